//! Crate prelude

pub use crate::event_loop::TEventLoop;
pub use crate::interface::InterfaceResolver;

/// Implements a `builder()` function for the specified type
pub trait BuilderDelegate<T: Default> {
    /// Initializes a new default builder of type `T`
    fn builder() -> T {
        T::default()
    }
}
