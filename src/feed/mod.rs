pub mod alerts;
pub mod encode;
