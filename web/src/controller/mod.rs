pub(crate) mod health_check_controller;
pub(crate) mod heartbeat_controller;
pub(crate) mod stream_controller;
pub(crate) mod subscriber_controller;
