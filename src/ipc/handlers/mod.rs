pub mod admin;
pub mod core;
pub mod docente;
pub mod porteria;
pub mod workspace_backup;
