pub mod factory;
pub mod inject;
pub mod persona;
pub mod scrape;
