mod request;
mod response;

pub use request::{Method, Request};
pub use response::Response;
