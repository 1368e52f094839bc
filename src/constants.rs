/// Schema and role names that may never be used as a dynamic table or column name
pub const RESERVED_NAMES: &[&str] = &[
    "information_schema",
    "pg_catalog",
    "pg_toast",
    "pg_temp",
    "pg_toast_temp",
    "public",
    "admin",
    "guest",
    "user",
];

/// SQL keywords rejected as identifiers (compared case-insensitively)
pub const RESERVED_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TABLE", "WHERE",
    "JOIN", "FROM", "ORDER", "BY", "ASC", "DESC", "LIMIT", "OFFSET", "GROUP", "HAVING",
    "UNION", "INTERSECT", "EXCEPT", "ALL", "EXISTS", "TRUE", "FALSE", "NULL", "CASE", "WHEN",
    "THEN", "ELSE", "END", "IS", "NOT", "AND", "OR", "BETWEEN", "IN", "LIKE", "ISNULL",
    "ISNOTNULL", "ISDISTINCTFROM", "ISNOTDISTINCTFROM", "ISUNKNOWN", "ISNOTUNKNOWN", "ISTRUE",
    "ISNOTTRUE", "ISFALSE", "ISNOTFALSE",
];

/// Catalog and identity tables the query gateway must never reach
pub const RESTRICTED_TABLES: &[&str] = &[
    "user_tables",
    "table_definitions",
    "users",
    "favorite_tables",
    "refresh_tokens",
    "_sqlx_migrations",
];

/// Postgres truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Name of the implicit primary key prepended to every dynamic table
pub const ID_COLUMN: &str = "id";

/// Status value that makes a table readable by everyone
pub const PUBLIC_STATUS: &str = "public";

/// Postgres caps bind parameters per statement at 65535
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Upper bound for page sizes on listing endpoints
pub const MAX_PAGE_SIZE: i64 = 100;

/// Minimum accepted password length at registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for missing or malformed bearer credentials
pub const ERR_LOGIN_REQUIRED: &str = "Please login before executing this action";

/// Error message for a credential that failed verification
pub const ERR_INVALID_TOKEN: &str = "Invalid token";

/// Error message for wrong email/password combinations
pub const ERR_INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Error message for reads of tables that are missing or private to someone else
pub const ERR_TABLE_NOT_FOUND: &str = "Table not found";

/// Error message for writes by anyone but the owner (also used for missing tables)
pub const ERR_NOT_TABLE_OWNER: &str = "You do not have permission to modify this table";
