pub mod contract;
pub mod discovery;
pub mod forecast;
pub mod price;
pub mod recommendation;
