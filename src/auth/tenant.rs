//! Tenant identity, data-center resolution, and onboarding records.

// self
use crate::{
	_prelude::*,
	auth::{TenantId, TokenSecret},
};

/// Identity-provider region a tenant's account lives in.
///
/// Determines the token endpoint's TLD (§6) and has no bearing on the tenant's SaaS base URL,
/// which is supplied independently at onboarding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataCenter {
	/// United States.
	Us,
	/// European Union.
	Eu,
	/// India.
	In,
	/// Australia.
	Au,
	/// Japan.
	Jp,
	/// United Kingdom.
	Uk,
	/// Canada.
	Ca,
	/// China.
	Cn,
}
impl DataCenter {
	/// Token endpoint TLD for this data center, per the external-interfaces mapping.
	pub fn tld(self) -> &'static str {
		match self {
			Self::Us => "com",
			Self::Eu => "eu",
			Self::In => "in",
			Self::Au => "com.au",
			Self::Jp => "jp",
			Self::Uk => "uk",
			Self::Ca => "zohocloud.ca",
			Self::Cn => "com.cn",
		}
	}

	/// Builds the full `https://accounts.zoho.<tld>/oauth/v2/token` endpoint for this region.
	pub fn token_endpoint(self) -> Url {
		Url::parse(&format!("https://accounts.zoho.{}/oauth/v2/token", self.tld()))
			.expect("Data center TLD table produces a valid URL by construction.")
	}

	/// Parses a data-center tag from its canonical uppercase string form.
	pub fn parse(tag: &str) -> Option<Self> {
		match tag.to_ascii_uppercase().as_str() {
			"US" => Some(Self::Us),
			"EU" => Some(Self::Eu),
			"IN" => Some(Self::In),
			"AU" => Some(Self::Au),
			"JP" => Some(Self::Jp),
			"UK" => Some(Self::Uk),
			"CA" => Some(Self::Ca),
			"CN" => Some(Self::Cn),
			_ => None,
		}
	}
}
impl Display for DataCenter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let tag = match self {
			Self::Us => "US",
			Self::Eu => "EU",
			Self::In => "IN",
			Self::Au => "AU",
			Self::Jp => "JP",
			Self::Uk => "UK",
			Self::Ca => "CA",
			Self::Cn => "CN",
		};

		f.write_str(tag)
	}
}

/// One end customer's isolated credential and configuration scope.
///
/// Data-center and base URL are fixed at onboarding (§3 invariant); nothing in the broker
/// mutates them afterwards short of an operator replacing the tenant record outright.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tenant {
	/// Opaque, stable tenant identifier.
	pub id: TenantId,
	/// Identity-provider region.
	pub data_center: DataCenter,
	/// SaaS base URL, e.g. `https://sdpondemand.manageengine.com`.
	pub base_url: Url,
	/// Path segment identifying the tenant's SaaS instance.
	pub instance: String,
	/// OAuth client id registered with the identity provider.
	pub client_id: String,
	/// OAuth client secret registered with the identity provider.
	pub client_secret: TokenSecret,
}
impl Tenant {
	/// Builds the base URL for REST calls: `{base_url}/app/{instance}/api/v3`.
	pub fn api_root(&self) -> Url {
		let mut url = self.base_url.clone();

		{
			let mut segments =
				url.path_segments_mut().expect("Tenant base URL must be able to carry a path.");

			segments.push("app");
			segments.push(&self.instance);
			segments.push("api");
			segments.push("v3");
		}

		url
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn data_center_tld_table_matches_external_contract() {
		assert_eq!(DataCenter::Us.tld(), "com");
		assert_eq!(DataCenter::Eu.tld(), "eu");
		assert_eq!(DataCenter::In.tld(), "in");
		assert_eq!(DataCenter::Au.tld(), "com.au");
		assert_eq!(DataCenter::Jp.tld(), "jp");
		assert_eq!(DataCenter::Uk.tld(), "uk");
		assert_eq!(DataCenter::Ca.tld(), "zohocloud.ca");
		assert_eq!(DataCenter::Cn.tld(), "com.cn");
	}

	#[test]
	fn token_endpoint_is_well_formed() {
		assert_eq!(DataCenter::Us.token_endpoint().as_str(), "https://accounts.zoho.com/oauth/v2/token");
		assert_eq!(
			DataCenter::Ca.token_endpoint().as_str(),
			"https://accounts.zoho.zohocloud.ca/oauth/v2/token"
		);
	}

	#[test]
	fn parse_is_case_insensitive_and_rejects_unknown() {
		assert_eq!(DataCenter::parse("us"), Some(DataCenter::Us));
		assert_eq!(DataCenter::parse("Uk"), Some(DataCenter::Uk));
		assert_eq!(DataCenter::parse("mars"), None);
	}

	#[test]
	fn api_root_joins_instance_path() {
		let tenant = Tenant {
			id: TenantId::new("tenant-1").unwrap(),
			data_center: DataCenter::Us,
			base_url: Url::parse("https://sdpondemand.manageengine.com").unwrap(),
			instance: "acme".into(),
			client_id: "1000.XYZ".into(),
			client_secret: TokenSecret::new("secret"),
		};

		assert_eq!(
			tenant.api_root().as_str(),
			"https://sdpondemand.manageengine.com/app/acme/api/v3"
		);
	}
}
