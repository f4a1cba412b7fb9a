pub mod incidents;
pub mod oncalls;
