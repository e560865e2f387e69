//! Загрузка сырых записей о билетах из SQLite и CSV.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

const SQLITE_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];
const RECORDS_CAPACITY: usize = 4096;

/// Строка исходной таблицы. Дата остаётся сырым текстом: правило разбора
/// применяется позже, при построении обучающей выборки.
#[derive(Clone, Debug, PartialEq)]
pub struct RawTicketRecord {
    pub ski_day: Option<String>,
    pub valid_tickets: Option<f64>,
}

pub trait TicketLoader {
    fn load(&self, source: &Path) -> Result<Vec<RawTicketRecord>, PipelineError>;
}

#[derive(Clone, Debug)]
pub struct SqliteTicketLoader {
    pub table: String,
    pub date_column: String,
    pub value_column: String,
}

#[derive(Clone, Debug)]
pub struct CsvTicketLoader {
    pub date_column: String,
    pub value_column: String,
}

/// Выбирает загрузчик по расширению: SQLite для `.db`/`.sqlite`/`.sqlite3`, иначе CSV.
pub fn loader_for(config: &PipelineConfig) -> Box<dyn TicketLoader> {
    let is_sqlite = config
        .source
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SQLITE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        });
    if is_sqlite {
        Box::new(SqliteTicketLoader {
            table: config.table.clone(),
            date_column: config.date_column.clone(),
            value_column: config.value_column.clone(),
        })
    } else {
        Box::new(CsvTicketLoader {
            date_column: config.date_column.clone(),
            value_column: config.value_column.clone(),
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn cell_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(int) => Some(int.to_string()),
        ValueRef::Real(real) => Some(real.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn cell_to_number(value: ValueRef<'_>) -> Option<f64> {
    match value {
        ValueRef::Integer(int) => Some(int as f64),
        ValueRef::Real(real) => Some(real),
        ValueRef::Text(bytes) => parse_count(&String::from_utf8_lossy(bytes)),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

fn parse_count(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

impl TicketLoader for SqliteTicketLoader {
    fn load(&self, source: &Path) -> Result<Vec<RawTicketRecord>, PipelineError> {
        // Только чтение: отсутствующий файл даёт ошибку, а не новую пустую базу.
        let conn = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|err| PipelineError::load(source, err))?;
        let sql = format!(
            "SELECT {}, {} FROM {}",
            quote_identifier(&self.date_column),
            quote_identifier(&self.value_column),
            quote_identifier(&self.table),
        );
        debug!(%sql, "Querying ticket table");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|err| PipelineError::schema(source, err.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|err| PipelineError::load(source, err))?;

        let mut records = Vec::with_capacity(RECORDS_CAPACITY);
        while let Some(row) = rows.next().map_err(|err| PipelineError::load(source, err))? {
            let day = row
                .get_ref(0)
                .map_err(|err| PipelineError::load(source, err))?;
            let count = row
                .get_ref(1)
                .map_err(|err| PipelineError::load(source, err))?;
            records.push(RawTicketRecord {
                ski_day: cell_to_text(day),
                valid_tickets: cell_to_number(count),
            });
        }
        info!(
            rows = records.len(),
            table = %self.table,
            source = %source.display(),
            "Loaded ticket records"
        );
        Ok(records)
    }
}

impl TicketLoader for CsvTicketLoader {
    fn load(&self, source: &Path) -> Result<Vec<RawTicketRecord>, PipelineError> {
        let mut reader =
            csv::Reader::from_path(source).map_err(|err| PipelineError::load(source, err))?;
        let headers = reader
            .headers()
            .map_err(|err| PipelineError::load(source, err))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim() == name)
                .ok_or_else(|| PipelineError::schema(source, format!("missing column '{name}'")))
        };
        let date_idx = column(&self.date_column)?;
        let value_idx = column(&self.value_column)?;

        let records = reader
            .records()
            .map(|row| {
                let row = row.map_err(|err| PipelineError::load(source, err))?;
                Ok::<_, PipelineError>(RawTicketRecord {
                    ski_day: row
                        .get(date_idx)
                        .map(str::trim)
                        .filter(|raw| !raw.is_empty())
                        .map(str::to_string),
                    valid_tickets: row.get(value_idx).and_then(parse_count),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            rows = records.len(),
            source = %source.display(),
            "Loaded ticket records"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn record(day: Option<&str>, tickets: Option<f64>) -> RawTicketRecord {
        RawTicketRecord {
            ski_day: day.map(str::to_string),
            valid_tickets: tickets,
        }
    }

    fn sqlite_loader() -> SqliteTicketLoader {
        SqliteTicketLoader {
            table: "tickets".to_string(),
            date_column: "Ski Day".to_string(),
            value_column: "valid_tickets".to_string(),
        }
    }

    fn write_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE tickets ("Ski Day" TEXT, valid_tickets INTEGER, resort TEXT);
            INSERT INTO tickets VALUES ('2019-12-21', 812, 'north');
            INSERT INTO tickets VALUES ('2019-12-22 00:00:00', 1040, 'north');
            INSERT INTO tickets VALUES (NULL, 5, 'north');
            INSERT INTO tickets VALUES ('2019-12-23', NULL, 'north');
            INSERT INTO tickets VALUES ('2019-12-24', '77.5', 'north');
            "#,
        )
        .unwrap();
    }

    #[test]
    fn sqlite_loader_reads_both_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.db");
        write_db(&path);

        let records = sqlite_loader().load(&path).unwrap();
        assert_eq!(
            records,
            vec![
                record(Some("2019-12-21"), Some(812.0)),
                record(Some("2019-12-22 00:00:00"), Some(1040.0)),
                record(None, Some(5.0)),
                record(Some("2019-12-23"), None),
                record(Some("2019-12-24"), Some(77.5)),
            ]
        );
    }

    #[test]
    fn sqlite_missing_table_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.db");
        write_db(&path);

        let loader = SqliteTicketLoader {
            table: "sales".to_string(),
            ..sqlite_loader()
        };
        let err = loader.load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }), "{err}");
    }

    #[test]
    fn sqlite_missing_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let err = sqlite_loader().load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn csv_loader_matches_sqlite_records() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "resort,Ski Day,valid_tickets").unwrap();
        writeln!(file, "north,2019-12-21,812").unwrap();
        writeln!(file, "north,2019-12-22 00:00:00,1040").unwrap();
        writeln!(file, "north,,5").unwrap();
        writeln!(file, "north,2019-12-23,").unwrap();
        writeln!(file, "north,2019-12-24,77.5").unwrap();

        let loader = CsvTicketLoader {
            date_column: "Ski Day".to_string(),
            value_column: "valid_tickets".to_string(),
        };
        let from_csv = loader.load(file.path()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tickets.db");
        write_db(&path);
        let from_db = sqlite_loader().load(&path).unwrap();

        assert_eq!(from_csv, from_db);
    }

    #[test]
    fn csv_missing_column_is_a_schema_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,tickets").unwrap();
        writeln!(file, "2019-12-21,812").unwrap();

        let loader = CsvTicketLoader {
            date_column: "Ski Day".to_string(),
            value_column: "valid_tickets".to_string(),
        };
        let err = loader.load(file.path()).unwrap_err();
        assert!(err.to_string().contains("missing column 'Ski Day'"));
    }

    #[test]
    fn loader_is_chosen_by_extension() {
        let mut cfg = PipelineConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("tickets.DB");
        write_db(&db);
        cfg.source = db.clone();
        assert_eq!(loader_for(&cfg).load(&db).unwrap().len(), 5);

        let csv_path: PathBuf = dir.path().join("tickets.csv");
        std::fs::write(&csv_path, "Ski Day,valid_tickets\n2019-12-21,1\n").unwrap();
        cfg.source = csv_path.clone();
        assert_eq!(loader_for(&cfg).load(&csv_path).unwrap().len(), 1);
    }

    #[test]
    fn identifiers_are_escaped() {
        assert_eq!(quote_identifier("Ski Day"), "\"Ski Day\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
