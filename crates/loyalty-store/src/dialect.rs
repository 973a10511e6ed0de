//! Statement text for each store.
//!
//! A [`Dialect`] renders the keyspace DDL and the three logical templates
//! (full-record insert, partial clip update, point read by partition key) for
//! one store. Values are never interpolated into statement text; every
//! template uses positional placeholders.

use loyalty_core::{Container, Keyspace, RecordFamily};

/// Columns written by the partial clip update, in bind order.
pub const CLIP_COLUMNS: [&str; 4] = ["zip", "offer_id", "clipped", "updated"];

/// Renders statement text for a particular store.
pub trait Dialect: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Statements that drop the keyspace (if present) and recreate it with
    /// every container. Executed in order.
    fn schema_statements(&self, keyspace: &Keyspace) -> Vec<String>;

    /// Full-record insert for a family. Parameters follow
    /// [`RecordFamily::insert_columns`].
    fn insert_record(&self, keyspace: &str, family: RecordFamily) -> String;

    /// Partial clip update on the coupons container. Parameters follow
    /// [`CLIP_COLUMNS`].
    fn insert_clip(&self, keyspace: &str) -> String;

    /// Point read of every record in one partition of a family.
    fn select_partition(&self, keyspace: &str, family: RecordFamily) -> String;
}

/// CQL, as understood by Cassandra-compatible stores and by
/// [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, Copy, Default)]
pub struct CqlDialect;

impl CqlDialect {
    fn create_table(keyspace: &str, container: &Container) -> String {
        let columns: Vec<String> = container
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.column_type.cql_name()))
            .collect();
        let mut key = format!("({})", container.partition_key.join(", "));
        for clustering in &container.clustering_key {
            key.push_str(", ");
            key.push_str(clustering);
        }
        format!(
            "CREATE TABLE {keyspace}.{} ({}, PRIMARY KEY({key}))",
            container.name,
            columns.join(", ")
        )
    }

    fn insert(keyspace: &str, container: &str, columns: &[&str]) -> String {
        let placeholders = vec!["?"; columns.len()].join(",");
        format!(
            "INSERT INTO {keyspace}.{container} ({}) VALUES ({placeholders})",
            columns.join(", ")
        )
    }
}

impl Dialect for CqlDialect {
    fn name(&self) -> &'static str {
        "cql"
    }

    fn schema_statements(&self, keyspace: &Keyspace) -> Vec<String> {
        let mut statements = vec![
            format!("DROP KEYSPACE IF EXISTS {}", keyspace.name),
            format!(
                "CREATE KEYSPACE {} WITH replication = {{'class':'SimpleStrategy', 'replication_factor':1}}",
                keyspace.name
            ),
        ];
        statements.extend(
            keyspace
                .containers
                .iter()
                .map(|c| Self::create_table(&keyspace.name, c)),
        );
        statements
    }

    fn insert_record(&self, keyspace: &str, family: RecordFamily) -> String {
        Self::insert(keyspace, family.container(), &family.insert_columns())
    }

    fn insert_clip(&self, keyspace: &str) -> String {
        Self::insert(keyspace, RecordFamily::ByZip.container(), &CLIP_COLUMNS)
    }

    fn select_partition(&self, keyspace: &str, family: RecordFamily) -> String {
        format!(
            "SELECT * FROM {keyspace}.{} WHERE {} = ?",
            family.container(),
            family.partition_column()
        )
    }
}

/// PostgreSQL. Containers become tables in a schema named after the
/// keyspace; inserts are upserts so the last write wins like in a
/// wide-column store.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn quote(ident: &str) -> String {
        format!("\"{ident}\"")
    }

    fn quoted_list<'a>(idents: impl IntoIterator<Item = &'a str>) -> String {
        idents
            .into_iter()
            .map(Self::quote)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn create_table(keyspace: &str, container: &Container) -> String {
        let columns: Vec<String> = container
            .columns
            .iter()
            .map(|c| format!("{} {}", Self::quote(&c.name), c.column_type.postgres_name()))
            .collect();
        format!(
            "CREATE TABLE {keyspace}.{} ({}, PRIMARY KEY ({}))",
            Self::quote(&container.name),
            columns.join(", "),
            Self::quoted_list(container.primary_key())
        )
    }

    fn upsert(keyspace: &str, family: RecordFamily, columns: &[&str]) -> String {
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let key = [family.partition_column(), "offer_id"];
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !key.contains(c))
            .map(|c| format!("{} = EXCLUDED.{}", Self::quote(c), Self::quote(c)))
            .collect();
        format!(
            "INSERT INTO {keyspace}.{} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            Self::quote(family.container()),
            Self::quoted_list(columns.iter().copied()),
            placeholders.join(", "),
            Self::quoted_list(key),
            updates.join(", ")
        )
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn schema_statements(&self, keyspace: &Keyspace) -> Vec<String> {
        let mut statements = vec![
            format!("DROP SCHEMA IF EXISTS {} CASCADE", keyspace.name),
            format!("CREATE SCHEMA {}", keyspace.name),
        ];
        statements.extend(
            keyspace
                .containers
                .iter()
                .map(|c| Self::create_table(&keyspace.name, c)),
        );
        statements
    }

    fn insert_record(&self, keyspace: &str, family: RecordFamily) -> String {
        Self::upsert(keyspace, family, &family.insert_columns())
    }

    fn insert_clip(&self, keyspace: &str) -> String {
        Self::upsert(keyspace, RecordFamily::ByZip, &CLIP_COLUMNS)
    }

    fn select_partition(&self, keyspace: &str, family: RecordFamily) -> String {
        format!(
            "SELECT {} FROM {keyspace}.{} WHERE {} = $1 ORDER BY {}",
            Self::quoted_list(family.insert_columns()),
            Self::quote(family.container()),
            Self::quote(family.partition_column()),
            Self::quote("offer_id")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cql_schema_statements() {
        let statements = CqlDialect.schema_statements(&Keyspace::loyalty());
        assert_eq!(statements[0], "DROP KEYSPACE IF EXISTS loyalty");
        assert!(statements[1].starts_with("CREATE KEYSPACE loyalty WITH replication"));
        assert_eq!(
            statements[2],
            "CREATE TABLE loyalty.coupons (zip text, offer_id text, data text, liked boolean, \
             clipped boolean, updated timestamp, PRIMARY KEY((zip), offer_id))"
        );
        assert!(statements[5].ends_with("PRIMARY KEY((offer_id, bucket), time))"));
        assert_eq!(statements.len(), 6);
    }

    #[test]
    fn test_cql_templates() {
        assert_eq!(
            CqlDialect.insert_record("loyalty", RecordFamily::ByHousehold),
            "INSERT INTO loyalty.personalized_deals (household_id, offer_id, data, liked, clipped, updated) \
             VALUES (?,?,?,?,?,?)"
        );
        assert_eq!(
            CqlDialect.insert_clip("loyalty"),
            "INSERT INTO loyalty.coupons (zip, offer_id, clipped, updated) VALUES (?,?,?,?)"
        );
        assert_eq!(
            CqlDialect.select_partition("loyalty", RecordFamily::ByZip),
            "SELECT * FROM loyalty.coupons WHERE zip = ?"
        );
    }

    #[test]
    fn test_postgres_clip_upsert_only_touches_clip_columns() {
        let sql = PostgresDialect.insert_clip("loyalty");
        assert_eq!(
            sql,
            "INSERT INTO loyalty.\"coupons\" (\"zip\", \"offer_id\", \"clipped\", \"updated\") \
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"zip\", \"offer_id\") \
             DO UPDATE SET \"clipped\" = EXCLUDED.\"clipped\", \"updated\" = EXCLUDED.\"updated\""
        );
    }

    #[test]
    fn test_postgres_schema_statements() {
        let statements = PostgresDialect.schema_statements(&Keyspace::loyalty());
        assert_eq!(statements[0], "DROP SCHEMA IF EXISTS loyalty CASCADE");
        assert_eq!(statements[1], "CREATE SCHEMA loyalty");
        assert!(statements[5].contains("\"time\" TIMESTAMPTZ"));
        assert!(statements[5].ends_with("PRIMARY KEY (\"offer_id\", \"bucket\", \"time\"))"));
    }

    #[test]
    fn test_postgres_select_partition() {
        assert_eq!(
            PostgresDialect.select_partition("loyalty", RecordFamily::ByZip),
            "SELECT \"zip\", \"offer_id\", \"data\", \"liked\", \"clipped\", \"updated\" \
             FROM loyalty.\"coupons\" WHERE \"zip\" = $1 ORDER BY \"offer_id\""
        );
    }
}
