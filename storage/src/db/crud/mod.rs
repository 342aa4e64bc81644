pub mod history;
pub mod track;
