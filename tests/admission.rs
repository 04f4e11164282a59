#[path = "support/cluster.rs"]
mod cluster;

#[path = "admission/depth_boundary.rs"]
mod depth_boundary;
#[path = "admission/http_surface.rs"]
mod http_surface;
