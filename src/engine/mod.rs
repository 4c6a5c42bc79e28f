pub mod dimensions;
pub mod facts;
pub mod pipeline;
