//! Organization and user management commands.
//!
//! # Usage
//!
//! ```bash
//! # Bootstrap a tenant with its first admin
//! crm-cli org create -n "Northside Auto" --admin-email ada@northside.test \
//!     --admin-name "Ada Lovelace" --admin-subject "idp|ada"
//!
//! # Suspend a tenant, or bring it back
//! crm-cli org set-active --org 1 --active false
//!
//! # Add staff to an existing tenant
//! crm-cli user create --org 1 -e pia@northside.test -n "Pia Moreno" -r processing -s "idp|pia"
//! ```
//!
//! Customers are not created here; order intake creates them.

use parts_crm_core::{Email, OrganizationId, Role};
use parts_crm_server::db::{NewOrganization, NewUser, OrganizationPatch, RecordStore};
use parts_crm_server::models::User;
use parts_crm_server::services::split_name;

use super::{CliError, connect};

fn parse_email(value: &str) -> Result<Email, CliError> {
    Email::parse(value).map_err(|e| CliError::Invalid(format!("{value}: {e}")))
}

fn staff_user(
    org_id: OrganizationId,
    email: &str,
    name: &str,
    role: Role,
    subject: &str,
) -> Result<NewUser, CliError> {
    if !role.is_staff() {
        return Err(CliError::Invalid(format!(
            "{role} is not a staff role; customers are created by order intake"
        )));
    }
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(CliError::Invalid("subject id is required".to_string()));
    }
    let (first_name, last_name) = split_name(name);
    if first_name.is_empty() {
        return Err(CliError::Invalid("name is required".to_string()));
    }

    Ok(NewUser {
        org_id,
        external_id: Some(subject.to_string()),
        first_name,
        last_name,
        email: Some(parse_email(email)?),
        phone: None,
        role,
    })
}

/// Create an organization and its first admin.
///
/// # Errors
///
/// Returns an error for invalid input, duplicate users or database failures.
pub async fn create_organization(
    name: &str,
    contact_email: Option<&str>,
    admin_email: &str,
    admin_name: &str,
    admin_subject: &str,
) -> Result<(), CliError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::Invalid("organization name is required".to_string()));
    }
    let contact_email = contact_email.map(parse_email).transpose()?;
    // Validate the admin before writing anything.
    staff_user(
        OrganizationId::new(0),
        admin_email,
        admin_name,
        Role::Admin,
        admin_subject,
    )?;

    let store = connect().await?;
    let org = store
        .create_organization(NewOrganization {
            name: name.to_string(),
            contact_email,
        })
        .await?;
    tracing::info!(org_id = %org.id, name = %org.name, "Organization created");

    let admin = store
        .create_user(staff_user(
            org.id,
            admin_email,
            admin_name,
            Role::Admin,
            admin_subject,
        )?)
        .await?;
    report(&admin);
    Ok(())
}

/// Switch an organization on or off.
///
/// An inactive organization's users are refused at sign-in, so an admin who
/// switched their own tenant off comes back through here.
///
/// # Errors
///
/// Returns an error for an unknown organization or database failures.
pub async fn set_organization_active(
    org_id: OrganizationId,
    active: bool,
) -> Result<(), CliError> {
    let store = connect().await?;
    let org = store
        .update_organization(
            org_id,
            OrganizationPatch {
                name: None,
                contact_email: None,
                active: Some(active),
            },
        )
        .await?
        .ok_or_else(|| CliError::Invalid(format!("organization {org_id} does not exist")))?;
    tracing::info!(org_id = %org.id, active = org.active, "Organization updated");
    Ok(())
}

/// Create a staff user in an existing organization.
///
/// # Errors
///
/// Returns an error for invalid input, an unknown organization, duplicate
/// users or database failures.
pub async fn create_user(
    org_id: OrganizationId,
    email: &str,
    name: &str,
    role: Role,
    subject: &str,
) -> Result<(), CliError> {
    let new = staff_user(org_id, email, name, role, subject)?;

    let store = connect().await?;
    if store.get_organization(org_id).await?.is_none() {
        return Err(CliError::Invalid(format!("organization {org_id} does not exist")));
    }

    let user = store.create_user(new).await?;
    report(&user);
    Ok(())
}

fn report(user: &User) {
    tracing::info!(
        user_id = %user.id,
        org_id = %user.org_id,
        role = %user.role,
        subject = user.external_id.as_deref().unwrap_or_default(),
        "User created"
    );
    #[allow(clippy::print_stdout)]
    {
        println!("{} ({}) user id {}", user.full_name(), user.role, user.id);
    }
}
