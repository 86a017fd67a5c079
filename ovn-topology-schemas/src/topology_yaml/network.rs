use serde::{Deserialize, Serialize};
use validator::Validate;

/// An internal project network, realised as a logical switch behind the project router.
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
#[serde(rename_all = "snake_case")]
pub struct NetworkConfig {
    #[validate(length(min = 1, max = 24))]
    pub name: String,
    /// router address and prefix length i.e. `10.0.0.1/24`
    pub gateway4: String,
    /// router address and prefix length i.e. `fd47:8ac3:9083:35f6::1/64`
    pub gateway6: String,
    pub dns4: String,
    pub dns6: String,
}
