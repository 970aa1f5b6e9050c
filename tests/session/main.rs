mod common;
mod generate;
mod init;
