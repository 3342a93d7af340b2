pub mod command;
pub mod command_attempt;
pub mod device;
pub mod device_registration;
pub mod heartbeat;
pub mod job_execution;
pub mod membership;
pub mod organization;

pub use command::Entity as Command;
pub use command_attempt::Entity as CommandAttempt;
pub use device::Entity as Device;
pub use device_registration::Entity as DeviceRegistration;
pub use heartbeat::Entity as Heartbeat;
pub use job_execution::Entity as JobExecution;
pub use membership::Entity as Membership;
pub use organization::Entity as Organization;
