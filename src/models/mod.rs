pub mod busy;
pub mod event;
pub mod goal;
