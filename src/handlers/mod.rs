pub mod health_handlers;
pub mod meta_handlers;
pub mod share_handlers;
