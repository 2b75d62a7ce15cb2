mod errors;
mod model;
mod service;

pub use errors::ServiceError;
pub use model::{NewUser, User};
pub use service::UserService;
