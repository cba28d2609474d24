pub mod errors;
pub mod table;

pub use errors::ParserError;
pub use table::{is_null_token, parse_csv, read_csv_file, CsvTable, DELIMITER, NULL_TOKENS};
