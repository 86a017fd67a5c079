pub mod dhcp;
pub mod nat;
pub mod route;
pub mod router_advertisement;
