//! Built-in worker tools

mod database;
mod execute_command;
mod glob_files;
mod list_directory;
mod patch_file;
mod read_file;
mod search_files;
mod web_reader;
mod web_search;
mod write_file;

pub use database::{ExecuteSqlTool, InitDatabaseTool, ListTablesTool};
pub use execute_command::ExecuteCommandTool;
pub use glob_files::GlobFilesTool;
pub use list_directory::ListDirectoryTool;
pub use patch_file::PatchFileTool;
pub use read_file::ReadFileTool;
pub use search_files::SearchFilesTool;
pub use web_reader::WebReaderTool;
pub use web_search::WebSearchTool;
pub use write_file::WriteFileTool;
