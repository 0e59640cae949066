mod app;
mod gui;
mod platform;
mod renderer;
mod resource;
mod ui;

fn main() {
    app::AstraApp::run();
}
