// Adapters behind the application ports

pub mod csv_record_adapter;
pub mod http_client;
pub mod json_table_source;
pub mod report_output_adapter;

pub use csv_record_adapter::{CsvRecordReader, CsvRecordWriter};
pub use http_client::ChatCompletionsClient;
pub use json_table_source::JsonTableSource;
pub use report_output_adapter::JsonReportWriter;
