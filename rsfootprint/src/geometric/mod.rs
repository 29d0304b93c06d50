pub mod building;
pub mod footprint;
pub mod wireframe;
