pub mod crawl;
pub mod init;
