// SPDX-License-Identifier: MIT

pub use ::redb_bincode;

/// Define a typed `redb` table as a module
///
/// The module exposes `Key`, `Value` and the `TABLE` definition, so call
/// sites read like `tx.open_table(&pbft_votes::TABLE)`.
#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = $crate::redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: $crate::redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: $crate::redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = $crate::redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = $crate::redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// Open (and so create, if missing) every listed table in a write transaction
///
/// Read transactions fail on tables that were never created, so every
/// table should be opened once right after the database is created.
#[macro_export]
macro_rules! open_tables {
    ($dbtx:expr, $($name:ident),+ $(,)?) => {{
        $(
            $dbtx.open_table(&$name::TABLE)?;
        )+
    }};
}
