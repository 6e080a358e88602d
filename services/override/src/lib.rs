pub mod controller;
pub mod grant;


pub use controller::OverrideController;
pub use grant::OverrideGrant;
