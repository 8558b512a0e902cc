pub mod backups;
pub mod companions;
