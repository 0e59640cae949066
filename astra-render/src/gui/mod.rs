pub mod gui;
pub mod gui_pass;
