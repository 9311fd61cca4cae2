//! `classify` handler: offline role assignment for described devices.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tabled::Tabled;

use netsentry_core::{
    Capabilities, Device, DeviceId, DeviceRole, IdentificationSignals, MacAddress, MethodKind,
    classify, methods_for_role,
};

use crate::cli::{ClassifyArgs, GlobalOpts};
use crate::commands::util;
use crate::config;
use crate::error::CliError;
use crate::output;

/// What an operator knows about a device. Everything but the address is
/// optional.
#[derive(Debug, Deserialize)]
struct DeviceDescription {
    address: IpAddr,
    #[serde(default)]
    mac: Option<MacAddress>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    capabilities: Capabilities,
    #[serde(default)]
    signals: IdentificationSignals,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Classification {
    address: IpAddr,
    hostname: Option<String>,
    role: DeviceRole,
    methods: Vec<MethodKind>,
}

#[derive(Tabled)]
struct ClassificationRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Hostname")]
    hostname: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Methods")]
    methods: String,
}

impl From<&Classification> for ClassificationRow {
    fn from(c: &Classification) -> Self {
        Self {
            address: c.address.to_string(),
            hostname: output::or_dash(c.hostname.as_deref()),
            role: c.role.to_string(),
            methods: if c.methods.is_empty() {
                "-".into()
            } else {
                c.methods
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            },
        }
    }
}

fn to_device(id: DeviceId, desc: DeviceDescription) -> Device {
    Device {
        id,
        address: desc.address,
        mac: desc.mac,
        hostname: desc.hostname,
        role: DeviceRole::Unknown,
        capabilities: desc.capabilities,
        managed: true,
        parent_id: None,
        signals: desc.signals,
        identified_at: None,
        is_online: true,
        last_seen: None,
    }
}

fn classify_all(descriptions: Vec<DeviceDescription>) -> Vec<Classification> {
    (1_u64..)
        .zip(descriptions)
        .map(|(n, desc)| {
            let device = to_device(DeviceId::new(n), desc);
            let role = classify(&device, &device.signals);
            Classification {
                address: device.address,
                hostname: device.hostname,
                role,
                methods: methods_for_role(role).to_vec(),
            }
        })
        .collect()
}

pub fn handle(args: &ClassifyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (cfg, _) = config::load(global)?;
    let format = config::output_format(global, &cfg);

    let input = util::read_input(&args.input)?;
    let results = classify_all(input.json_array()?);
    let out = output::render_list(format, &results, |c| ClassificationRow::from(c), |c| {
        format!("{} {}", c.address, c.role)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
