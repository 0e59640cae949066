pub mod frame_context;
pub mod gpu_scene;
pub mod renderer;
pub mod rt_descriptors;
pub mod rt_pipeline;
