pub mod check;
pub mod delete;
pub mod export;
pub mod generate;
pub mod init;
pub mod show;
pub mod upload;
