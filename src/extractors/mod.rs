pub mod request;
pub mod user;

pub use request::RestRequest;
pub use user::CurrentUser;
