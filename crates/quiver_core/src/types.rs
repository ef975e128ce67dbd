pub use self::asset::*;
pub use self::build_options::*;
pub use self::dependency::*;
pub use self::file_type::*;
pub use self::json::*;
pub use self::rendition::*;
pub use self::source::*;

mod asset;
mod build_options;
mod dependency;
mod file_type;
mod json;
mod rendition;
mod source;
