//! Metadata catalog
//!
//! Area and dataflow names, descriptions and area/dataflow membership, read
//! from the warehoused SQLite store. The store is populated elsewhere; this
//! module only reads it.

use crate::error::{PrismError, Result};
use crate::sdmx::Language;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Tables a populated store carries.
pub const CATALOG_TABLES: [&str; 7] = [
    "language",
    "cl_area",
    "cl_area_name",
    "dataflow",
    "dataflow_name",
    "dataflow_description",
    "cl_area_dataflow",
];

/// A code with its localized label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub label: String,
}

/// Read access to area and dataflow metadata.
pub trait Catalog: Send + Sync {
    fn area_label(&self, area: &str, language: Language) -> Result<Option<String>>;

    fn dataflow_label(&self, dataflow: &str, language: Language) -> Result<Option<String>>;

    fn dataflow_description(&self, dataflow: &str, language: Language) -> Result<Option<String>>;

    /// Every area with a name in `language`, ordered by name.
    fn areas(&self, language: Language) -> Result<Vec<CatalogEntry>>;

    /// Dataflows that publish data for `area`, ordered by name.
    fn dataflows_for_area(&self, area: &str, language: Language) -> Result<Vec<CatalogEntry>>;

    /// Whether every catalog table exists and holds rows.
    fn is_ready(&self) -> Result<bool>;
}

const AREA_LABEL_SQL: &str = r#"
    SELECT n.name
    FROM cl_area AS a
    JOIN cl_area_name AS n ON a.cl_area_uid = n.cl_area_uid
    JOIN language AS l ON n.language_uid = l.language_uid
    WHERE a.code = ?1 AND l.code = ?2
"#;

const DATAFLOW_LABEL_SQL: &str = r#"
    SELECT n.name
    FROM dataflow AS d
    JOIN dataflow_name AS n ON d.dataflow_uid = n.dataflow_uid
    JOIN language AS l ON n.language_uid = l.language_uid
    WHERE d.code = ?1 AND l.code = ?2
"#;

const DATAFLOW_DESCRIPTION_SQL: &str = r#"
    SELECT s.description
    FROM dataflow AS d
    JOIN dataflow_description AS s ON d.dataflow_uid = s.dataflow_uid
    JOIN language AS l ON s.language_uid = l.language_uid
    WHERE d.code = ?1 AND l.code = ?2
"#;

const AREAS_SQL: &str = r#"
    SELECT a.code, n.name
    FROM cl_area AS a
    JOIN cl_area_name AS n ON a.cl_area_uid = n.cl_area_uid
    JOIN language AS l ON n.language_uid = l.language_uid
    WHERE l.code = ?1
    ORDER BY n.name
"#;

const AREA_DATAFLOWS_SQL: &str = r#"
    SELECT d.code, n.name
    FROM cl_area AS a
    JOIN cl_area_dataflow AS ad ON a.cl_area_uid = ad.cl_area_uid
    JOIN dataflow AS d ON ad.dataflow_uid = d.dataflow_uid
    JOIN dataflow_name AS n ON d.dataflow_uid = n.dataflow_uid
    JOIN language AS l ON n.language_uid = l.language_uid
    WHERE a.code = ?1 AND l.code = ?2
    ORDER BY n.name
"#;

/// [`Catalog`] over the SQLite warehouse file.
pub struct SqliteCatalog {
    db: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open an existing store read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|e| {
            PrismError::Catalog(format!("Failed to open catalog {}: {}", path.display(), e))
        })?;
        info!("Opened metadata catalog {}", path.display());
        Ok(Self::from_connection(db))
    }

    /// Wrap a connection the caller already holds.
    pub fn from_connection(db: Connection) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| PrismError::Catalog("Catalog connection lock poisoned".to_string()))
    }

    /// Single text lookup in `language`, falling back to English.
    fn lookup(&self, sql: &str, code: &str, language: Language) -> Result<Option<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(sql)?;

        let found: Option<String> = stmt
            .query_row(params![code, language.code()], |row| row.get(0))
            .optional()?;
        if found.is_some() || language == Language::En {
            return Ok(found);
        }

        debug!("No {} text for {}, falling back to English", language, code);
        let fallback = stmt
            .query_row(params![code, Language::En.code()], |row| row.get(0))
            .optional()?;
        Ok(fallback)
    }

    fn entries(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<CatalogEntry>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(CatalogEntry {
                code: row.get(0)?,
                label: row.get(1)?,
            })
        })?;
        let entries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

impl Catalog for SqliteCatalog {
    fn area_label(&self, area: &str, language: Language) -> Result<Option<String>> {
        self.lookup(AREA_LABEL_SQL, area, language)
    }

    fn dataflow_label(&self, dataflow: &str, language: Language) -> Result<Option<String>> {
        self.lookup(DATAFLOW_LABEL_SQL, dataflow, language)
    }

    fn dataflow_description(&self, dataflow: &str, language: Language) -> Result<Option<String>> {
        self.lookup(DATAFLOW_DESCRIPTION_SQL, dataflow, language)
    }

    fn areas(&self, language: Language) -> Result<Vec<CatalogEntry>> {
        self.entries(AREAS_SQL, &[&language.code()])
    }

    fn dataflows_for_area(&self, area: &str, language: Language) -> Result<Vec<CatalogEntry>> {
        let dataflows = self.entries(AREA_DATAFLOWS_SQL, &[&area, &language.code()])?;
        debug!("{} dataflows available for {}", dataflows.len(), area);
        Ok(dataflows)
    }

    fn is_ready(&self) -> Result<bool> {
        let db = self.conn()?;
        for table in CATALOG_TABLES {
            let exists: i64 = db.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )?;
            if exists == 0 {
                warn!("Catalog table {} is missing", table);
                return Ok(false);
            }
            // table names come from the fixed list above
            let rows: i64 =
                db.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            if rows == 0 {
                warn!("Catalog table {} is empty", table);
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let db = Connection::open_in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TABLE language (language_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
            CREATE TABLE cl_area (cl_area_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
            CREATE TABLE cl_area_name (cl_area_uid INTEGER, language_uid INTEGER, name TEXT);
            CREATE TABLE dataflow (dataflow_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
            CREATE TABLE dataflow_name (dataflow_uid INTEGER, language_uid INTEGER, name TEXT);
            CREATE TABLE dataflow_description (dataflow_uid INTEGER, language_uid INTEGER, description TEXT);
            CREATE TABLE cl_area_dataflow (cl_area_uid INTEGER, dataflow_uid INTEGER);

            INSERT INTO language VALUES (1, 'en'), (2, 'fr'), (3, 'es');
            INSERT INTO cl_area VALUES (1, 'BRA'), (2, 'EGY');
            INSERT INTO cl_area_name VALUES (1, 1, 'Brazil'), (1, 2, 'Brésil'), (2, 1, 'Egypt');
            INSERT INTO dataflow VALUES (1, 'DF_UNE_TUNE_SEX_AGE_NB'), (2, 'DF_EMP_TEMP_SEX_AGE_NB');
            INSERT INTO dataflow_name VALUES
                (1, 1, 'Unemployment by sex and age'),
                (2, 1, 'Employment by sex and age');
            INSERT INTO dataflow_description VALUES (1, 1, 'Persons without work.');
            INSERT INTO cl_area_dataflow VALUES (1, 1), (1, 2), (2, 2);
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_labels_with_english_fallback() {
        let catalog = SqliteCatalog::from_connection(seeded());
        assert_eq!(
            catalog.area_label("BRA", Language::Fr).unwrap().as_deref(),
            Some("Brésil")
        );
        assert_eq!(
            catalog.area_label("EGY", Language::Fr).unwrap().as_deref(),
            Some("Egypt")
        );
        assert_eq!(catalog.area_label("XXX", Language::En).unwrap(), None);
        assert_eq!(
            catalog
                .dataflow_description("DF_UNE_TUNE_SEX_AGE_NB", Language::Es)
                .unwrap()
                .as_deref(),
            Some("Persons without work.")
        );
        assert_eq!(
            catalog
                .dataflow_description("DF_EMP_TEMP_SEX_AGE_NB", Language::En)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_listings_are_sorted_by_name() {
        let catalog = SqliteCatalog::from_connection(seeded());
        let areas = catalog.areas(Language::En).unwrap();
        let codes: Vec<&str> = areas.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec!["BRA", "EGY"]);

        let dataflows = catalog.dataflows_for_area("BRA", Language::En).unwrap();
        assert_eq!(dataflows.len(), 2);
        assert_eq!(dataflows[0].label, "Employment by sex and age");
        assert!(catalog
            .dataflows_for_area("BRA", Language::Fr)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_readiness() {
        assert!(SqliteCatalog::from_connection(seeded()).is_ready().unwrap());

        let empty = Connection::open_in_memory().unwrap();
        assert!(!SqliteCatalog::from_connection(empty).is_ready().unwrap());

        let db = seeded();
        db.execute("DELETE FROM cl_area_dataflow", []).unwrap();
        assert!(!SqliteCatalog::from_connection(db).is_ready().unwrap());
    }
}
