pub mod credential;
pub mod request;
pub mod stage;
