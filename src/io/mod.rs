pub mod csv_grid;
pub mod excel_read;
pub mod overlay;
pub mod template;
