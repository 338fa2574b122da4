pub mod conversion_service;
pub mod process_service;
pub mod workspace_service;
