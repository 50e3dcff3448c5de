//! The `record!` declaration macro.

/// Declare a struct and implement [`Record`](crate::mapper::Record) for it.
///
/// Each field names the column it maps to. An optional access marker follows
/// the column:
///
/// - none: selected and inserted
/// - `[read_only]`: selected, never inserted (identity or generated columns)
/// - `[write_only]`: inserted, never selected; set to `Default` when read
///
/// Rows must return the selectable columns in declaration order.
///
/// ```ignore
/// txdb::record! {
///     #[derive(Debug, Clone)]
///     pub struct Account in "accounts" {
///         pub id: i64 => "id" [read_only],
///         pub owner: String => "owner",
///         pub balance: i64 => "balance",
///         pub pin_hash: String => "pin_hash" [write_only],
///     }
/// }
/// ```
#[macro_export]
macro_rules! record {
    (@access) => {
        $crate::mapper::FieldAccess::ReadWrite
    };
    (@access read_only) => {
        $crate::mapper::FieldAccess::ReadOnly
    };
    (@access write_only) => {
        $crate::mapper::FieldAccess::WriteOnly
    };

    (@decode $values:ident, $column:literal, $ty:ty) => {
        $crate::mapper::decode_next::<$ty, _>(&mut $values, $column)?
    };
    (@decode $values:ident, $column:literal, $ty:ty, read_only) => {
        $crate::mapper::decode_next::<$ty, _>(&mut $values, $column)?
    };
    (@decode $values:ident, $column:literal, $ty:ty, write_only) => {
        <$ty as ::core::default::Default>::default()
    };

    (@insert $values:ident, $value:expr) => {
        $values.push($crate::models::SqlValue::from($value))
    };
    (@insert $values:ident, $value:expr, read_only) => {};
    (@insert $values:ident, $value:expr, write_only) => {
        $values.push($crate::models::SqlValue::from($value))
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $table:literal {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty => $column:literal $([$access:ident])?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::mapper::Record for $name {
            fn describe() -> $crate::mapper::RecordSchema {
                $crate::mapper::RecordSchema::new(
                    $table,
                    vec![
                        $(
                            $crate::mapper::FieldDescriptor {
                                field: stringify!($field),
                                column: $column,
                                type_name: stringify!($ty),
                                access: $crate::record!(@access $($access)?),
                            },
                        )*
                    ],
                )
            }

            fn from_values(
                values: Vec<$crate::models::SqlValue>,
            ) -> $crate::error::DbResult<Self> {
                let mut values = values.into_iter();
                $(
                    let $field: $ty = $crate::record!(@decode values, $column, $ty $(, $access)?);
                )*
                Ok(Self { $($field,)* })
            }

            fn insert_values(&self) -> Vec<$crate::models::SqlValue> {
                #[allow(unused_mut)]
                let mut values = Vec::new();
                $(
                    $crate::record!(@insert values, self.$field.clone() $(, $access)?);
                )*
                values
            }
        }
    };
}
