pub mod health;
pub use self::health::health;

pub mod user_register;
pub use self::user_register::register;

pub mod user_login;
pub use self::user_login::login;

pub mod google_login;
pub use self::google_login::login_google;

pub mod profile;
pub use self::profile::{find_user, update_profile};

pub mod tutorial;
pub use self::tutorial::mark_tutorial_seen;
