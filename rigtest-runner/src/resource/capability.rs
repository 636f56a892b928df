// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability keys and the device-resource contract.

use crate::{errors::ResourceError, log_sink::LogProxy, runner::TestId};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    sync::{Arc, Mutex},
};

/// The property key under which target-control resources report the product
/// name of the device under test.
pub const PRODUCT_NAME_PROPERTY: &str = "product_name";

/// A category of test-rig resource.
///
/// Every resource a group can hold is identified by one of these keys. The
/// set mirrors what the lab allocator hands out; a test simply finds absent
/// capabilities bound as `None`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Target abstraction layer: the primary control link to the DUT.
    Tal,
    /// Target abstraction layer over HTTP.
    TalHttp,
    /// Target abstraction layer over the Android debug bridge.
    TalAdb,
    /// Target abstraction layer over a STAF automation channel.
    TalStaf,
    /// Navigation channel for driving the DUT's user interface.
    Navigation,
    /// IR hardware transmitter used for real-telegram navigation.
    Ltap,
    /// Verification channel observing actual device behavior.
    Verification,
    /// Remote control telegram encoder.
    RemoteControl,
    /// Bluetooth remote control.
    BtRemoteControl,
    /// IR receiver forwarding captured telegrams to the test PC.
    IrReceiver,
    /// Video modulator playing DVB content.
    VideoModulator,
    /// Audio card receiving and verifying sound.
    SoundCard,
    /// Bluetooth audio device sending sound out.
    BtSoundCard,
    /// Quantum content generator feeding the HDMI ports.
    QuantumGenerator,
    /// Controller for legacy A1-platform televisions.
    A1Controller,
    /// Rohde & Schwarz SFU broadcast tester controller.
    SfuController,
    /// PTS Bluetooth protocol tester controller.
    PtsController,
    /// Serial console capture from the target.
    SerialOutput,
    /// ACM camera manager.
    AcmCamera,
    /// Relay discharging selected devices on a board.
    DischargeRelay,
    /// External storage attached to the DUT.
    ExtStorage,
    /// Conditional-access module card in the DUT.
    CamCard,
    /// Mock stand peripheral.
    Stand,
    /// Mock business-to-business set-top box.
    Btb,
    /// Mock plasma panel.
    Panel,
    /// Audio Precision APx sound tester controller.
    ApxController,
    /// Communicator for Apple devices on the rig.
    AppleCommunicator,
    /// Serial detector for sound presence on PowerLink channels.
    PlSoundDetector,
    /// Portal service container used as an equipment endpoint.
    PortalService,
    /// Host and port of a running Selenium server.
    SeleniumServer,
    /// XML-RPC connection to a webcam.
    WebcamController,
    /// Wireless router on the test network.
    RouterWlan,
    /// Wired router on the test network.
    RouterLan,
    /// Bonjour/Zeroconf browser.
    BonjourBrowser,
    /// Digital sound engine endpoint.
    Dse,
    /// DLNA media server.
    DlnaServer,
    /// Mock front-end processor.
    Fep,
    /// Chromecast endpoint.
    Chromecast,
}

impl ResourceKind {
    /// Every known capability key.
    pub const ALL: &'static [ResourceKind] = &[
        ResourceKind::Tal,
        ResourceKind::TalHttp,
        ResourceKind::TalAdb,
        ResourceKind::TalStaf,
        ResourceKind::Navigation,
        ResourceKind::Ltap,
        ResourceKind::Verification,
        ResourceKind::RemoteControl,
        ResourceKind::BtRemoteControl,
        ResourceKind::IrReceiver,
        ResourceKind::VideoModulator,
        ResourceKind::SoundCard,
        ResourceKind::BtSoundCard,
        ResourceKind::QuantumGenerator,
        ResourceKind::A1Controller,
        ResourceKind::SfuController,
        ResourceKind::PtsController,
        ResourceKind::SerialOutput,
        ResourceKind::AcmCamera,
        ResourceKind::DischargeRelay,
        ResourceKind::ExtStorage,
        ResourceKind::CamCard,
        ResourceKind::Stand,
        ResourceKind::Btb,
        ResourceKind::Panel,
        ResourceKind::ApxController,
        ResourceKind::AppleCommunicator,
        ResourceKind::PlSoundDetector,
        ResourceKind::PortalService,
        ResourceKind::SeleniumServer,
        ResourceKind::WebcamController,
        ResourceKind::RouterWlan,
        ResourceKind::RouterLan,
        ResourceKind::BonjourBrowser,
        ResourceKind::Dse,
        ResourceKind::DlnaServer,
        ResourceKind::Fep,
        ResourceKind::Chromecast,
    ];

    /// The snake_case wire name of this key.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Tal => "tal",
            ResourceKind::TalHttp => "tal_http",
            ResourceKind::TalAdb => "tal_adb",
            ResourceKind::TalStaf => "tal_staf",
            ResourceKind::Navigation => "navigation",
            ResourceKind::Ltap => "ltap",
            ResourceKind::Verification => "verification",
            ResourceKind::RemoteControl => "remote_control",
            ResourceKind::BtRemoteControl => "bt_remote_control",
            ResourceKind::IrReceiver => "ir_receiver",
            ResourceKind::VideoModulator => "video_modulator",
            ResourceKind::SoundCard => "sound_card",
            ResourceKind::BtSoundCard => "bt_sound_card",
            ResourceKind::QuantumGenerator => "quantum_generator",
            ResourceKind::A1Controller => "a1_controller",
            ResourceKind::SfuController => "sfu_controller",
            ResourceKind::PtsController => "pts_controller",
            ResourceKind::SerialOutput => "serial_output",
            ResourceKind::AcmCamera => "acm_camera",
            ResourceKind::DischargeRelay => "discharge_relay",
            ResourceKind::ExtStorage => "ext_storage",
            ResourceKind::CamCard => "cam_card",
            ResourceKind::Stand => "stand",
            ResourceKind::Btb => "btb",
            ResourceKind::Panel => "panel",
            ResourceKind::ApxController => "apx_controller",
            ResourceKind::AppleCommunicator => "apple_communicator",
            ResourceKind::PlSoundDetector => "pl_sound_detector",
            ResourceKind::PortalService => "portal_service",
            ResourceKind::SeleniumServer => "selenium_server",
            ResourceKind::WebcamController => "webcam_controller",
            ResourceKind::RouterWlan => "router_wlan",
            ResourceKind::RouterLan => "router_lan",
            ResourceKind::BonjourBrowser => "bonjour_browser",
            ResourceKind::Dse => "dse",
            ResourceKind::DlnaServer => "dlna_server",
            ResourceKind::Fep => "fep",
            ResourceKind::Chromecast => "chromecast",
        }
    }

    /// Whether log lines from this resource get an identification prefix at
    /// binding time.
    pub fn is_addressable(self) -> bool {
        matches!(
            self,
            ResourceKind::Tal
                | ResourceKind::Navigation
                | ResourceKind::Verification
                | ResourceKind::SerialOutput
                | ResourceKind::Ltap
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned while parsing a [`ResourceKind`] from a string.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unrecognized resource kind: {input}")]
pub struct ResourceKindParseError {
    input: String,
}

impl FromStr for ResourceKind {
    type Err = ResourceKindParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == input)
            .ok_or_else(|| ResourceKindParseError {
                input: input.to_owned(),
            })
    }
}

/// Context handed to [`DeviceResource::post_setup`] after binding.
#[derive(Clone, Debug)]
pub struct PostSetupContext<'a> {
    /// The test case the resource was bound for.
    pub test_id: &'a TestId,
    /// The role the owning group was bound under, if any.
    pub role: Option<&'a str>,
}

/// The contract a rig-allocated resource handle implements.
///
/// Every method except [`attach_logger`](Self::attach_logger) has a benign
/// default, so device clients only implement what their hardware supports.
/// The harness holds handles as [`SharedResource`] and never owns the
/// underlying hardware session.
pub trait DeviceResource: Send {
    /// Receives the name-scoped logger so the resource's log lines stay
    /// attributable. Called once at binding time for addressable kinds.
    fn attach_logger(&mut self, logger: LogProxy) {
        let _ = logger;
    }

    /// Additional setup after the whole test context exists.
    fn post_setup(&mut self, cx: &PostSetupContext<'_>) -> Result<(), ResourceError> {
        let _ = cx;
        Ok(())
    }

    /// Property map of the device behind this resource.
    fn properties(&self) -> IndexMap<String, String> {
        IndexMap::new()
    }

    /// Retrieves the device syslog, returning the local path it was saved
    /// to.
    fn syslog(&mut self) -> Result<Utf8PathBuf, ResourceError> {
        Err(ResourceError::Unsupported)
    }

    /// Copies core dumps off the device.
    fn fetch_coredumps(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Deletes core dumps from the device.
    fn remove_coredumps(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Retrieves report files from the device for the given result row.
    fn fetch_reports(&mut self, result_id: i64) -> Result<(), ResourceError> {
        let _ = result_id;
        Ok(())
    }

    /// Captures the serial console output. Only serial-output resources
    /// implement this.
    fn capture_output(&mut self) -> Result<Utf8PathBuf, ResourceError> {
        Err(ResourceError::Unsupported)
    }

    /// Captures the front-end-processor serial output.
    fn capture_fep_output(&mut self) -> Result<Utf8PathBuf, ResourceError> {
        Err(ResourceError::Unsupported)
    }

    /// Whether this handle is a live device channel rather than plain data.
    /// Used when enumerating the bound entities of a group.
    fn is_device(&self) -> bool {
        true
    }
}

/// A shared, non-owning reference to one device resource.
pub type SharedResource = Arc<Mutex<dyn DeviceResource>>;

/// Wraps a resource implementation into a [`SharedResource`].
pub fn share(resource: impl DeviceResource + 'static) -> SharedResource {
    Arc::new(Mutex::new(resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), *kind);
        }
        assert!("warp_drive".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn addressable_subset() {
        let addressable: Vec<_> = ResourceKind::ALL
            .iter()
            .filter(|kind| kind.is_addressable())
            .map(|kind| kind.as_str())
            .collect();
        assert_eq!(
            addressable,
            ["tal", "navigation", "ltap", "verification", "serial_output"]
        );
    }
}
