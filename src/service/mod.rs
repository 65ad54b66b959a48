pub mod devices;
pub mod external_data;
pub mod internal_data;
pub mod keep_alive;
pub mod platform_status;
pub(crate) mod relay;

pub use devices::DevicesService;
pub use external_data::{DataProvider, ExternalDataService};
pub use internal_data::InternalDataService;
pub use keep_alive::KeepAliveService;
pub use platform_status::PlatformStatusService;
