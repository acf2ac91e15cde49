mod indexing_container;

pub use indexing_container::*;

pub use chrono;
pub use indoc;
pub use log;
pub use parking_lot;
pub use pathdiff;
pub use thiserror;
pub use uuid;

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}
