pub mod change_value;
pub mod changelog;
pub mod issue;
pub mod status;
pub mod time;

pub use change_value::*;
pub use changelog::*;
pub use issue::*;
pub use status::*;
pub use time::parse_tracker_time;
