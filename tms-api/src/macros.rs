//! Utility macros for reducing boilerplate

/// Implement `FromRef<AppState>` so handlers can extract one field of the
/// shared state directly.
///
/// ```ignore
/// impl_from_ref!(Arc<EmailService>, email);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<EmailService> {
///     fn from_ref(state: &AppState) -> Self {
///         state.email.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
