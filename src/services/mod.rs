pub mod document_service;
pub mod export;
pub mod nomina_service;
