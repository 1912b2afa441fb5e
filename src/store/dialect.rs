use serde::{Deserialize, Serialize};

/// SQL dialects the mapping tables can be created on.
///
/// Source page ids are 64-bit; the id column must hold the full range. Where a
/// dialect has no suitable native integer type the column falls back to an
/// exact decimal numeric. This table is exhaustive on purpose: adding a
/// dialect without deciding its id type must not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
    Mariadb,
    Mssql,
    Oracle,
    H2,
    Hsqldb,
    Derby,
}

impl Dialect {
    pub const fn id_column_type(self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER",
            Dialect::Postgres => "BIGINT",
            Dialect::Mysql => "BIGINT",
            Dialect::Mariadb => "BIGINT",
            Dialect::Mssql => "BIGINT",
            // No native 64-bit integer column; NUMBER maps through NUMERIC.
            Dialect::Oracle => "NUMERIC(19,0)",
            Dialect::H2 => "BIGINT",
            Dialect::Hsqldb => "BIGINT",
            Dialect::Derby => "BIGINT",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
            Dialect::Mariadb => "mariadb",
            Dialect::Mssql => "mssql",
            Dialect::Oracle => "oracle",
            Dialect::H2 => "h2",
            Dialect::Hsqldb => "hsqldb",
            Dialect::Derby => "derby",
        }
    }
}
