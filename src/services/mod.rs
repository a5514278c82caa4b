pub mod answer_script_repo;
pub mod content_store;
pub mod ingestion_service;
pub mod memorandum_repo;
pub mod memorandum_service;
pub mod roster;
pub mod storage_service;
