pub mod gltf_loader;
