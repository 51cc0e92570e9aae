use ilo_prism::catalog::{Catalog, SqliteCatalog};
use ilo_prism::config::Settings;
use ilo_prism::sdmx::Language;
use rusqlite::Connection;
use std::path::Path;
use tempfile::TempDir;

/// Create a warehouse file with the same layout the metadata loader writes.
fn create_store(path: &Path) {
    let db = Connection::open(path).unwrap();
    db.execute_batch(
        r#"
        CREATE TABLE language (language_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
        CREATE TABLE cl_area (cl_area_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
        CREATE TABLE cl_area_name (cl_area_uid INTEGER, language_uid INTEGER, name TEXT,
            UNIQUE(cl_area_uid, language_uid));
        CREATE TABLE dataflow (dataflow_uid INTEGER PRIMARY KEY, code TEXT UNIQUE);
        CREATE TABLE dataflow_name (dataflow_uid INTEGER, language_uid INTEGER, name TEXT);
        CREATE TABLE dataflow_description (dataflow_uid INTEGER, language_uid INTEGER, description TEXT);
        CREATE TABLE cl_area_dataflow (cl_area_uid INTEGER, dataflow_uid INTEGER);

        INSERT INTO language (code) VALUES ('en'), ('fr'), ('es');
        INSERT INTO cl_area (code) VALUES ('BRA'), ('X01');
        INSERT INTO cl_area_name VALUES
            (1, 1, 'Brazil'), (1, 2, 'Brésil'), (1, 3, 'Brasil'),
            (2, 1, 'World');
        INSERT INTO dataflow (code) VALUES ('DF_EAR_4MTH_SEX_CUR_NB'), ('DF_UNE_2EAP_SEX_AGE_RT');
        INSERT INTO dataflow_name VALUES
            (1, 1, 'Average monthly earnings of employees by sex'),
            (1, 3, 'Ingresos mensuales promedio de los asalariados por sexo'),
            (2, 1, 'Unemployment rate by sex and age');
        INSERT INTO dataflow_description VALUES
            (2, 1, 'The unemployment rate conveys the number of persons who are unemployed as a percent of the labour force.');
        INSERT INTO cl_area_dataflow VALUES (1, 1), (1, 2), (2, 2);
        "#,
    )
    .unwrap();
}

#[test]
fn test_catalog_file_lookups() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ilo-prism.db");
    create_store(&path);

    let catalog = SqliteCatalog::open(&path).unwrap();
    assert!(catalog.is_ready().unwrap());

    assert_eq!(
        catalog.area_label("BRA", Language::Es).unwrap().as_deref(),
        Some("Brasil")
    );
    assert_eq!(
        catalog
            .dataflow_label("DF_EAR_4MTH_SEX_CUR_NB", Language::Es)
            .unwrap()
            .as_deref(),
        Some("Ingresos mensuales promedio de los asalariados por sexo")
    );
    assert_eq!(
        catalog
            .dataflow_label("DF_UNE_2EAP_SEX_AGE_RT", Language::Fr)
            .unwrap()
            .as_deref(),
        Some("Unemployment rate by sex and age")
    );
    assert!(catalog
        .dataflow_description("DF_UNE_2EAP_SEX_AGE_RT", Language::En)
        .unwrap()
        .unwrap()
        .starts_with("The unemployment rate"));

    let dataflows = catalog.dataflows_for_area("BRA", Language::En).unwrap();
    let codes: Vec<&str> = dataflows.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, vec!["DF_EAR_4MTH_SEX_CUR_NB", "DF_UNE_2EAP_SEX_AGE_RT"]);

    let world = catalog.dataflows_for_area("X01", Language::En).unwrap();
    assert_eq!(world.len(), 1);
}

#[test]
fn test_catalog_is_read_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ilo-prism.db");
    create_store(&path);

    let _catalog = SqliteCatalog::open(&path).unwrap();
    let missing = SqliteCatalog::open(dir.path().join("absent.db"));
    assert!(missing.is_err());
    assert!(!dir.path().join("absent.db").exists());
}

#[test]
fn test_unpopulated_store_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ilo-prism.db");
    Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE language (language_uid INTEGER PRIMARY KEY, code TEXT);")
        .unwrap();

    let catalog = SqliteCatalog::open(&path).unwrap();
    assert!(!catalog.is_ready().unwrap());
}

#[test]
fn test_catalog_path_from_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    create_store(&path);

    let path_str = path.to_string_lossy().to_string();
    let settings = Settings::from_lookup(|key| match key {
        "PRISM_CATALOG_PATH" => Some(path_str.clone()),
        "PRISM_LANGUAGE" => Some("fr".to_string()),
        _ => None,
    })
    .unwrap();

    let catalog = SqliteCatalog::open(&settings.catalog_path).unwrap();
    assert_eq!(
        catalog.area_label("BRA", settings.language).unwrap().as_deref(),
        Some("Brésil")
    );
}
