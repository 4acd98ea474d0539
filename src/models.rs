use serde::{Deserialize, Deserializer};

/// Gerrit username
pub type Username = String;

/// Owner, uploader, approver or any other account reference in an event.
#[derive(Deserialize, Debug, Clone)]
pub struct Account {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub username: Option<Username>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub project: String,
    pub branch: String,
    pub topic: Option<String>,
    #[serde(rename = "id")]
    pub change_id: String,
    #[serde(deserialize_with = "de_number")]
    pub number: u32,
    pub subject: String,
    pub url: String,
    pub owner: Option<Account>,
    pub status: Option<String>,
    #[serde(rename = "sortKey")]
    pub sortkey: Option<String>,
    pub current_patch_set: Option<CurrentPatchset>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Patchset {
    #[serde(deserialize_with = "de_number")]
    pub number: u32,
    pub revision: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub uploader: Option<Account>,
}

/// Patchset plus the review state that only query results carry.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPatchset {
    #[serde(flatten)]
    pub patchset: Patchset,
    pub author: Option<Account>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    #[serde(rename = "type")]
    pub category: String,
    pub value: String,
    pub description: Option<String>,
    #[serde(rename = "by")]
    pub approver: Option<Account>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    pub project: String,
    pub ref_name: String,
    pub old_rev: String,
    pub new_rev: String,
}

/// Old Gerrit versions send change and patchset numbers as strings, newer
/// ones as integers. Accept both.
fn de_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(number) => Ok(number),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}
