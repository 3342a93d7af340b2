use sea_orm::DatabaseConnection;
use tether::devices::Device;
use tether::pairing::{self, DeviceDescriptor};
use tether::principal::Principal;
use tether::settings::Settings;
use tether::tenant::{self, NewOrganization, Organization, Role, TenantContext};

/// Builder for creating test organizations with members
pub struct OrganizationBuilder {
    id: String,
    name: String,
    max_devices: i64,
    max_users: i64,
    members: Vec<(String, Role)>,
}

impl OrganizationBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{id} Inc."),
            max_devices: 25,
            max_users: 10,
            members: vec![(format!("{id}-owner"), Role::Owner)],
        }
    }

    pub fn with_max_devices(mut self, max_devices: i64) -> Self {
        self.max_devices = max_devices;
        self
    }

    pub fn with_max_users(mut self, max_users: i64) -> Self {
        self.max_users = max_users;
        self
    }

    pub fn with_member(mut self, subject: &str, role: Role) -> Self {
        self.members.push((subject.to_string(), role));
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> Organization {
        let org = tenant::create_organization(
            db,
            NewOrganization {
                id: Some(self.id.clone()),
                name: self.name,
                max_devices: self.max_devices,
                max_users: self.max_users,
            },
        )
        .await
        .expect("Failed to create organization");

        for (subject, role) in self.members {
            tenant::upsert_membership(db, &org.id, &subject, role)
                .await
                .expect("Failed to add member");
        }
        org
    }
}

/// Resolve the tenant context for `subject` acting in `organization_id`.
pub async fn context(db: &DatabaseConnection, organization_id: &str, subject: &str) -> TenantContext {
    tenant::resolve(
        db,
        &Principal::new(subject, Some(organization_id.to_string())),
    )
    .await
    .expect("Failed to resolve tenant context")
}

/// Run the whole pairing flow and return the provisioned device.
pub async fn paired_device(
    db: &DatabaseConnection,
    ctx: &TenantContext,
    push_token: Option<&str>,
) -> Device {
    let settings = Settings::default();
    let issued = pairing::issue_code(db, ctx, &settings.pairing, None, None)
        .await
        .expect("Failed to issue code");

    let mut descriptor = DeviceDescriptor::new("Pixel 7");
    descriptor.manufacturer = Some("Google".to_string());
    descriptor.push_token = push_token.map(str::to_string);
    pairing::submit_registration(db, &issued.pairing_code, descriptor)
        .await
        .expect("Failed to submit registration");

    pairing::approve(db, ctx, &settings.presence, &issued.registration_id)
        .await
        .expect("Failed to approve registration")
}
