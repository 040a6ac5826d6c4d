/// Configuration macros for zero-repetition config definitions
///
/// Provides the `config_struct!` macro that allows defining configuration
/// structures with embedded defaults in a single declaration.

/// Define a configuration struct with embedded defaults
///
/// Generates:
/// - The struct with public fields
/// - The Default implementation with the specified values
/// - Serde support with `#[serde(default)]`
///
/// # Example
/// ```rust,ignore
/// config_struct! {
///     pub struct DeliveryConfig {
///         workers: usize = 4,
///         ack_timeout_ms: u64 = 5_000,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
