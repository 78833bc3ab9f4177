//! BLE radio adapter.
//!
//! Implements [`RadioPort`]: one custom data service for the framed
//! command protocol plus a minimal HID keyboard service whose only job is
//! to press a wake key on the host.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: [`SimRadio`], a recording simulation for host tests.
//!
//! ## GATT layout
//!
//! | Attribute        | UUID                               | Perms              |
//! |------------------|------------------------------------|--------------------|
//! | Data service     | `6e400001-…-e50e24dcca9e`          |                    |
//! | Data             | `6e400002-…-e50e24dcca9e`          | Read+Write+Notify  |
//! | HID service      | `0x1812`                           |                    |
//! | HID information  | `0x2A4A`                           | Read               |
//! | Report map       | `0x2A4B`                           | Read               |
//! | Protocol mode    | `0x2A4E`                           | Read+Write         |
//! | Input report     | `0x2A4D`                           | Read+Notify        |
//!
//! Radio callbacks are forwarded to a process-wide [`LinkEvents`] router
//! installed once at boot; the router hands them to the link and the
//! command dispatcher.

use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};

use crate::app::ports::Address;
use crate::link::Connectivity;
use crate::rpc::channels::{Dispatcher, Submitted};

#[cfg(not(target_os = "espidf"))]
use crate::app::ports::RadioPort;
#[cfg(not(target_os = "espidf"))]
use crate::error::LinkError;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_DATA_UUID: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;

pub const HID_SERVICE_UUID: u16 = 0x1812;
#[cfg(target_os = "espidf")]
const HID_INFO_UUID: u16 = 0x2A4A;
#[cfg(target_os = "espidf")]
const HID_REPORT_MAP_UUID: u16 = 0x2A4B;
#[cfg(target_os = "espidf")]
const HID_PROTOCOL_MODE_UUID: u16 = 0x2A4E;
#[cfg(target_os = "espidf")]
const HID_REPORT_UUID: u16 = 0x2A4D;
#[cfg(target_os = "espidf")]
const CCCD_UUID: u16 = 0x2902;
#[cfg(target_os = "espidf")]
const REPORT_REFERENCE_UUID: u16 = 0x2908;

/// GAP appearance: keyboard.
pub const APPEARANCE_KEYBOARD: u16 = 0x03C1;

/// Largest attribute value the data characteristic holds.
pub const DATA_MAX_LEN: u16 = 303;

/// Keyboard input report, id 1: modifiers, reserved, six key codes.
pub const KEY_REPORT_LEN: usize = 8;
/// Left Ctrl in the modifier byte.
pub const WAKE_MODIFIER: u8 = 0x01;

#[cfg(any(target_os = "espidf", test))]
const REPORT_ID: u8 = 1;

/// Boot-keyboard report map with a report id.
#[cfg(any(target_os = "espidf", test))]
static REPORT_MAP: [u8; 41] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, REPORT_ID, //   Report ID
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute): modifiers
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant): reserved
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x81, 0x00, //   Input (Data, Array): key codes
    0xC0, // End Collection
];

/// bcdHID 1.11, country 0, flags: remote wake + normally connectable.
#[cfg(target_os = "espidf")]
static HID_INFO: [u8; 4] = [0x11, 0x01, 0x00, 0x03];

/// Advertising interval bounds in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingMode {
    /// 20–30 ms: no bond yet, a host is pairing.
    Fast,
    /// 100–500 ms: waiting for the bonded host to reconnect.
    Slow,
}

impl AdvertisingMode {
    pub fn for_bonds(bonded: usize) -> Self {
        if bonded == 0 { Self::Fast } else { Self::Slow }
    }

    pub const fn interval(self) -> (u16, u16) {
        match self {
            Self::Fast => (0x0020, 0x0030),
            Self::Slow => (0x00A0, 0x0320),
        }
    }
}

/// Mark `addr` (least significant byte first) as a static random address.
pub fn make_static_random(mut addr: Address) -> Address {
    addr[5] |= 0xC0;
    addr
}

// ───────────────────────────────────────────────────────────────
// Event router
// ───────────────────────────────────────────────────────────────

/// Where radio callbacks land.
pub struct LinkEvents {
    link: Arc<Connectivity>,
    dispatcher: Dispatcher,
}

static EVENTS: OnceLock<LinkEvents> = OnceLock::new();

impl LinkEvents {
    pub fn new(link: Arc<Connectivity>, dispatcher: Dispatcher) -> Self {
        Self { link, dispatcher }
    }

    pub fn connected(&self, peer: Address) {
        self.link.on_connect(peer);
    }

    pub fn disconnected(&self) {
        self.link.on_disconnect();
    }

    pub fn bonded(&self) {
        self.link.on_bonded();
    }

    /// Raw write on the data characteristic.
    pub fn write(&self, data: &[u8]) -> Submitted {
        self.dispatcher.submit(data)
    }
}

/// Route radio callbacks to `events`. Only the first call takes effect.
pub fn install_events(events: LinkEvents) -> bool {
    let installed = EVENTS.set(events).is_ok();
    if !installed {
        warn!("BLE: event router already installed");
    }
    installed
}

pub fn events() -> Option<&'static LinkEvents> {
    EVENTS.get()
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::BleRadio;

#[cfg(target_os = "espidf")]
mod esp {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use esp_idf_svc::sys::*;
    use log::{error, info, warn};

    use super::*;
    use crate::app::ports::RadioPort;
    use crate::error::LinkError;

    // Bluedroid callbacks are plain C function pointers; these statics
    // bridge the callback context to the adapter.
    static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    static CONN_ID: AtomicU32 = AtomicU32::new(0);
    static CONNECTED: AtomicBool = AtomicBool::new(false);
    static DATA_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    static HID_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    static DATA_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
    static REPORT_CHAR_HANDLE: AtomicU32 = AtomicU32::new(0);
    static SETUP_STEP: AtomicU32 = AtomicU32::new(0);
    static PEER: Mutex<Address> = Mutex::new([0; 6]);

    static PROTOCOL_MODE_REPORT: [u8; 1] = [0x01];
    static CCCD_OFF: [u8; 2] = [0x00, 0x00];
    static REPORT_REFERENCE: [u8; 2] = [REPORT_ID, 0x01];

    fn check(ret: esp_err_t) -> Result<(), LinkError> {
        if ret == ESP_OK as i32 {
            Ok(())
        } else {
            Err(LinkError::Stack(ret))
        }
    }

    fn uuid128(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    fn uuid16(uuid: u16) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 2;
        t.uuid.uuid16 = uuid;
        t
    }

    /// Bluedroid stores addresses most significant byte first.
    fn to_bda(addr: Address) -> esp_bd_addr_t {
        let mut bda = addr;
        bda.reverse();
        bda
    }

    fn from_bda(bda: &esp_bd_addr_t) -> Address {
        let mut addr = *bda;
        addr.reverse();
        addr
    }

    unsafe fn add_char(svc: u16, mut uuid: esp_bt_uuid_t, perm: u32, prop: u32, value: Option<&'static [u8]>, max_len: u16) {
        let mut control = esp_attr_control_t {
            auto_rsp: ESP_GATT_AUTO_RSP as u8,
        };
        let mut val = esp_attr_value_t {
            attr_max_len: max_len,
            attr_len: value.map_or(0, |v| v.len() as u16),
            attr_value: value.map_or(core::ptr::null_mut(), |v| v.as_ptr() as *mut u8),
        };
        let ret = unsafe {
            esp_ble_gatts_add_char(
                svc,
                &mut uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                &mut val,
                &mut control,
            )
        };
        if ret != ESP_OK as i32 {
            error!("BLE: add_char failed ({})", ret);
        }
    }

    unsafe fn add_descr(svc: u16, uuid: u16, perm: u32, value: &'static [u8]) {
        let mut uuid = uuid16(uuid);
        let mut control = esp_attr_control_t {
            auto_rsp: ESP_GATT_AUTO_RSP as u8,
        };
        let mut val = esp_attr_value_t {
            attr_max_len: value.len() as u16,
            attr_len: value.len() as u16,
            attr_value: value.as_ptr() as *mut u8,
        };
        let ret = unsafe {
            esp_ble_gatts_add_char_descr(svc, &mut uuid, perm as esp_gatt_perm_t, &mut val, &mut control)
        };
        if ret != ESP_OK as i32 {
            error!("BLE: add_char_descr failed ({})", ret);
        }
    }

    unsafe fn create_service(gatts_if: esp_gatt_if_t, uuid: esp_bt_uuid_t, handles: u16) {
        let mut id = esp_gatt_srvc_id_t {
            id: esp_gatt_id_t { uuid, inst_id: 0 },
            is_primary: true,
        };
        unsafe { esp_ble_gatts_create_service(gatts_if, &mut id, handles) };
    }

    fn bonded_peers() -> std::vec::Vec<Address> {
        let mut n = unsafe { esp_ble_get_bond_device_num() };
        if n <= 0 {
            return std::vec::Vec::new();
        }
        let mut list: std::vec::Vec<esp_ble_bond_dev_t> =
            (0..n).map(|_| unsafe { core::mem::zeroed() }).collect();
        if unsafe { esp_ble_get_bond_device_list(&mut n, list.as_mut_ptr()) } != ESP_OK as i32 {
            return std::vec::Vec::new();
        }
        list.truncate(n.max(0) as usize);
        list.iter().map(|d| from_bda(&d.bd_addr)).collect()
    }

    /// Once a peer is bonded, only that peer may connect.
    fn peer_allowed(peer: Address) -> bool {
        let bonded = bonded_peers();
        bonded.is_empty() || bonded.contains(&peer)
    }

    unsafe extern "C" fn gap_event_handler(event: esp_gap_ble_cb_event_t, param: *mut esp_ble_gap_cb_param_t) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                log::debug!("BLE GAP: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                log::debug!("BLE GAP: advertising stopped");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => unsafe {
                esp_ble_gap_security_rsp((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), true);
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
                let p = unsafe { &(*param).ble_security.auth_cmpl };
                if p.success {
                    log::info!("BLE GAP: authentication complete (bonded)");
                    if let Some(ev) = events() {
                        ev.bonded();
                    }
                } else {
                    log::warn!("BLE GAP: authentication failed (reason={})", p.fail_reason);
                }
            }
            _ => {}
        }
    }

    unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);

        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => unsafe {
                log::info!("BLE GATTS: app registered (if={})", gatts_if);
                SETUP_STEP.store(0, Ordering::Relaxed);
                create_service(gatts_if, uuid128(SERVICE_UUID), 8);
            },
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => unsafe {
                let svc = (*param).create.service_handle;
                esp_ble_gatts_start_service(svc);
                match SETUP_STEP.load(Ordering::Relaxed) {
                    0 => {
                        DATA_SVC_HANDLE.store(svc as u32, Ordering::Relaxed);
                        SETUP_STEP.store(1, Ordering::Relaxed);
                        add_char(
                            svc,
                            uuid128(CHAR_DATA_UUID),
                            ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE,
                            ESP_GATT_CHAR_PROP_BIT_READ
                                | ESP_GATT_CHAR_PROP_BIT_WRITE
                                | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            None,
                            DATA_MAX_LEN,
                        );
                    }
                    3 => {
                        HID_SVC_HANDLE.store(svc as u32, Ordering::Relaxed);
                        SETUP_STEP.store(4, Ordering::Relaxed);
                        add_char(
                            svc,
                            uuid16(HID_INFO_UUID),
                            ESP_GATT_PERM_READ_ENCRYPTED,
                            ESP_GATT_CHAR_PROP_BIT_READ,
                            Some(&HID_INFO),
                            HID_INFO.len() as u16,
                        );
                    }
                    step => warn!("BLE GATTS: unexpected service at step {}", step),
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => unsafe {
                let handle = (*param).add_char.attr_handle;
                let data_svc = DATA_SVC_HANDLE.load(Ordering::Relaxed) as u16;
                let hid_svc = HID_SVC_HANDLE.load(Ordering::Relaxed) as u16;
                match SETUP_STEP.load(Ordering::Relaxed) {
                    1 => {
                        DATA_CHAR_HANDLE.store(handle as u32, Ordering::Relaxed);
                        SETUP_STEP.store(2, Ordering::Relaxed);
                        add_descr(data_svc, CCCD_UUID, ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE, &CCCD_OFF);
                    }
                    4 => {
                        SETUP_STEP.store(5, Ordering::Relaxed);
                        add_char(
                            hid_svc,
                            uuid16(HID_REPORT_MAP_UUID),
                            ESP_GATT_PERM_READ_ENCRYPTED,
                            ESP_GATT_CHAR_PROP_BIT_READ,
                            Some(&REPORT_MAP),
                            REPORT_MAP.len() as u16,
                        );
                    }
                    5 => {
                        SETUP_STEP.store(6, Ordering::Relaxed);
                        add_char(
                            hid_svc,
                            uuid16(HID_PROTOCOL_MODE_UUID),
                            ESP_GATT_PERM_READ_ENCRYPTED | ESP_GATT_PERM_WRITE_ENCRYPTED,
                            ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_WRITE_NR,
                            Some(&PROTOCOL_MODE_REPORT),
                            1,
                        );
                    }
                    6 => {
                        SETUP_STEP.store(7, Ordering::Relaxed);
                        add_char(
                            hid_svc,
                            uuid16(HID_REPORT_UUID),
                            ESP_GATT_PERM_READ_ENCRYPTED,
                            ESP_GATT_CHAR_PROP_BIT_READ | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            None,
                            KEY_REPORT_LEN as u16,
                        );
                    }
                    7 => {
                        REPORT_CHAR_HANDLE.store(handle as u32, Ordering::Relaxed);
                        SETUP_STEP.store(8, Ordering::Relaxed);
                        add_descr(hid_svc, CCCD_UUID, ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE, &CCCD_OFF);
                    }
                    _ => {}
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => unsafe {
                match SETUP_STEP.load(Ordering::Relaxed) {
                    2 => {
                        SETUP_STEP.store(3, Ordering::Relaxed);
                        create_service(gatts_if, uuid16(HID_SERVICE_UUID), 16);
                    }
                    8 => {
                        SETUP_STEP.store(9, Ordering::Relaxed);
                        let hid_svc = HID_SVC_HANDLE.load(Ordering::Relaxed) as u16;
                        add_descr(hid_svc, REPORT_REFERENCE_UUID, ESP_GATT_PERM_READ, &REPORT_REFERENCE);
                    }
                    9 => {
                        SETUP_STEP.store(10, Ordering::Relaxed);
                        log::info!("BLE GATTS: all attributes registered");
                    }
                    _ => {}
                }
            },
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let p = unsafe { &(*param).connect };
                let peer = from_bda(&p.remote_bda);
                if !peer_allowed(peer) {
                    log::warn!("BLE GATTS: unknown peer rejected, a host is already bonded");
                    unsafe { esp_ble_gatts_close(gatts_if, p.conn_id) };
                    return;
                }
                CONN_ID.store(p.conn_id as u32, Ordering::Relaxed);
                CONNECTED.store(true, Ordering::Release);
                if let Ok(mut slot) = PEER.lock() {
                    *slot = peer;
                }
                let mut bda = p.remote_bda;
                unsafe { esp_ble_set_encryption(bda.as_mut_ptr(), esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT) };
                if let Some(ev) = events() {
                    ev.connected(peer);
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                let was_ours = CONNECTED.swap(false, Ordering::AcqRel);
                log::info!("BLE GATTS: disconnected (reason=0x{:02X})", unsafe { (*param).disconnect.reason });
                if was_ours {
                    if let Some(ev) = events() {
                        ev.disconnected();
                    }
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = unsafe { &(*param).write };
                let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
                if p.handle as u32 == DATA_CHAR_HANDLE.load(Ordering::Relaxed) {
                    if let Some(ev) = events() {
                        ev.write(data);
                    }
                } else if data.len() == 2 {
                    log::debug!("BLE GATTS: CCCD 0x{:04X} = {:02X?}", p.handle, data);
                }
            }
            _ => {}
        }
    }

    /// Bluedroid-backed [`RadioPort`].
    pub struct BleRadio;

    impl BleRadio {
        /// Bring up the controller, Bluedroid and the GATT application.
        pub fn new(device_name: &str) -> Result<Self, LinkError> {
            unsafe {
                esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

                let mut bt_cfg = esp_bt_controller_config_t::default();
                check(esp_bt_controller_init(&mut bt_cfg))?;
                check(esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE))?;
                check(esp_bluedroid_init())?;
                check(esp_bluedroid_enable())?;

                check(esp_ble_gap_register_callback(Some(gap_event_handler)))?;
                check(esp_ble_gatts_register_callback(Some(gatts_event_handler)))?;
                check(esp_ble_gatts_app_register(0))?;
                check(esp_ble_gatt_set_local_mtu(251))?;

                // Just-works bonding.
                let auth_req = esp_ble_auth_req_t_ESP_LE_AUTH_BOND;
                let iocap = esp_ble_io_cap_t_ESP_IO_CAP_NONE;
                let key_size: u8 = 16;
                let init_key: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;
                let rsp_key: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;
                esp_ble_gap_set_security_param(
                    esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
                    &auth_req as *const _ as *mut _,
                    core::mem::size_of_val(&auth_req) as u8,
                );
                esp_ble_gap_set_security_param(
                    esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
                    &iocap as *const _ as *mut _,
                    core::mem::size_of_val(&iocap) as u8,
                );
                esp_ble_gap_set_security_param(
                    esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE,
                    &key_size as *const _ as *mut _,
                    1,
                );
                esp_ble_gap_set_security_param(
                    esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY,
                    &init_key as *const _ as *mut _,
                    1,
                );
                esp_ble_gap_set_security_param(
                    esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY,
                    &rsp_key as *const _ as *mut _,
                    1,
                );

                let mut name = heapless::Vec::<u8, 32>::new();
                let _ = name.extend_from_slice(device_name.as_bytes());
                let _ = name.push(0);
                check(esp_ble_gap_set_device_name(name.as_ptr() as *const _))?;

                let mut svc_uuid = SERVICE_UUID.to_le_bytes();
                let mut adv_data = esp_ble_adv_data_t {
                    set_scan_rsp: false,
                    include_name: true,
                    include_txpower: false,
                    appearance: i32::from(APPEARANCE_KEYBOARD),
                    service_uuid_len: svc_uuid.len() as u16,
                    p_service_uuid: svc_uuid.as_mut_ptr(),
                    flag: (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8,
                    ..core::mem::zeroed()
                };
                check(esp_ble_gap_config_adv_data(&mut adv_data))?;
            }
            info!("BLE: Bluedroid stack up as '{}'", device_name);
            Ok(Self)
        }

        fn report(&self, report: &[u8; KEY_REPORT_LEN]) -> Result<(), LinkError> {
            let handle = REPORT_CHAR_HANDLE.load(Ordering::Relaxed) as u16;
            if handle == 0 {
                return Err(LinkError::Stack(ESP_ERR_INVALID_STATE as i32));
            }
            let mut buf = *report;
            check(unsafe {
                esp_ble_gatts_send_indicate(
                    GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                    CONN_ID.load(Ordering::Relaxed) as u16,
                    handle,
                    buf.len() as u16,
                    buf.as_mut_ptr(),
                    false,
                )
            })
        }
    }

    impl RadioPort for BleRadio {
        fn start_advertising(&self) -> Result<(), LinkError> {
            let mode = AdvertisingMode::for_bonds(self.bonded_count());
            let (min, max) = mode.interval();
            let mut params = esp_ble_adv_params_t {
                adv_int_min: min,
                adv_int_max: max,
                adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
                own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_RANDOM,
                channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
                adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
                ..unsafe { core::mem::zeroed() }
            };
            debug!("BLE: advertising {:?}", mode);
            check(unsafe { esp_ble_gap_start_advertising(&mut params) })
        }

        fn stop_advertising(&self) -> Result<(), LinkError> {
            check(unsafe { esp_ble_gap_stop_advertising() })
        }

        fn disconnect(&self) -> Result<(), LinkError> {
            if !CONNECTED.load(Ordering::Acquire) {
                return Ok(());
            }
            let peer = PEER.lock().map(|p| *p).unwrap_or([0; 6]);
            let mut bda = to_bda(peer);
            check(unsafe { esp_ble_gap_disconnect(bda.as_mut_ptr()) })
        }

        fn bonded_count(&self) -> usize {
            unsafe { esp_ble_get_bond_device_num() }.max(0) as usize
        }

        fn clear_bonds(&self) -> Result<(), LinkError> {
            for peer in bonded_peers() {
                let mut bda = to_bda(peer);
                check(unsafe { esp_ble_remove_bond_device(bda.as_mut_ptr()) })?;
            }
            info!("BLE: bonds cleared");
            Ok(())
        }

        fn set_address(&self, addr: Address) -> Result<(), LinkError> {
            let mut bda = to_bda(make_static_random(addr));
            check(unsafe { esp_ble_gap_set_rand_addr(bda.as_mut_ptr()) })
        }

        fn generate_address(&self) -> Address {
            let mut addr: Address = [0; 6];
            unsafe { esp_fill_random(addr.as_mut_ptr() as *mut _, addr.len()) };
            make_static_random(addr)
        }

        fn notify(&self, frame: &[u8]) -> Result<(), LinkError> {
            if !CONNECTED.load(Ordering::Acquire) {
                return Err(LinkError::NotConnected);
            }
            let handle = DATA_CHAR_HANDLE.load(Ordering::Relaxed) as u16;
            if handle == 0 {
                return Err(LinkError::Stack(ESP_ERR_INVALID_STATE as i32));
            }
            unsafe {
                check(esp_ble_gatts_set_attr_value(handle, frame.len() as u16, frame.as_ptr()))?;
                check(esp_ble_gatts_send_indicate(
                    GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                    CONN_ID.load(Ordering::Relaxed) as u16,
                    handle,
                    frame.len() as u16,
                    frame.as_ptr() as *mut u8,
                    false,
                ))
            }
        }

        fn send_wake_key(&self) -> Result<(), LinkError> {
            if !CONNECTED.load(Ordering::Acquire) {
                return Err(LinkError::NotConnected);
            }
            let mut press = [0u8; KEY_REPORT_LEN];
            press[0] = WAKE_MODIFIER;
            self.report(&press)?;
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.report(&[0u8; KEY_REPORT_LEN])
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Host simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimState {
    advertising: bool,
    mode: Option<AdvertisingMode>,
    bonded: usize,
    address: Address,
    generated: u8,
    notified: std::vec::Vec<std::vec::Vec<u8>>,
    wake_keys: usize,
    disconnects: usize,
    fail_notify: bool,
}

/// Recording [`RadioPort`] for host builds.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimRadio {
    state: std::sync::Mutex<SimState>,
}

#[cfg(not(target_os = "espidf"))]
impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn address(&self) -> Address {
        self.state().address
    }

    pub fn is_advertising(&self) -> bool {
        self.state().advertising
    }

    pub fn advertising_mode(&self) -> Option<AdvertisingMode> {
        self.state().mode
    }

    /// Frames passed to [`RadioPort::notify`], oldest first.
    pub fn notified(&self) -> std::vec::Vec<std::vec::Vec<u8>> {
        self.state().notified.clone()
    }

    pub fn take_notified(&self) -> std::vec::Vec<std::vec::Vec<u8>> {
        core::mem::take(&mut self.state().notified)
    }

    pub fn wake_keys(&self) -> usize {
        self.state().wake_keys
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn set_bonded(&self, count: usize) {
        self.state().bonded = count;
    }

    /// Make every later notify fail as the stack would under congestion.
    pub fn fail_notify(&self, fail: bool) {
        self.state().fail_notify = fail;
    }
}

#[cfg(not(target_os = "espidf"))]
impl RadioPort for SimRadio {
    fn start_advertising(&self) -> Result<(), LinkError> {
        let mut s = self.state();
        let mode = AdvertisingMode::for_bonds(s.bonded);
        s.advertising = true;
        s.mode = Some(mode);
        info!("BLE(sim): advertising {:?}", mode);
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), LinkError> {
        self.state().advertising = false;
        info!("BLE(sim): advertising stopped");
        Ok(())
    }

    fn disconnect(&self) -> Result<(), LinkError> {
        self.state().disconnects += 1;
        Ok(())
    }

    fn bonded_count(&self) -> usize {
        self.state().bonded
    }

    fn clear_bonds(&self) -> Result<(), LinkError> {
        self.state().bonded = 0;
        Ok(())
    }

    fn set_address(&self, addr: Address) -> Result<(), LinkError> {
        self.state().address = make_static_random(addr);
        Ok(())
    }

    fn generate_address(&self) -> Address {
        let mut s = self.state();
        s.generated = s.generated.wrapping_add(1);
        make_static_random([s.generated, 0x5A, 0x17, 0x3C, 0x00, 0x00])
    }

    fn notify(&self, frame: &[u8]) -> Result<(), LinkError> {
        let mut s = self.state();
        if s.fail_notify {
            return Err(LinkError::Stack(-1));
        }
        debug!("BLE(sim): notify {} bytes", frame.len());
        s.notified.push(frame.to_vec());
        Ok(())
    }

    fn send_wake_key(&self) -> Result<(), LinkError> {
        self.state().wake_keys += 1;
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_random_sets_top_bits() {
        let a = make_static_random([0x11, 0x22, 0x33, 0x44, 0x55, 0x06]);
        assert_eq!(a[5] & 0xC0, 0xC0);
        assert_eq!(&a[..5], &[0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn advertising_mode_follows_bonds() {
        assert_eq!(AdvertisingMode::for_bonds(0), AdvertisingMode::Fast);
        assert_eq!(AdvertisingMode::for_bonds(1), AdvertisingMode::Slow);
        let (min, max) = AdvertisingMode::Fast.interval();
        // 0.625 ms units: 20 ms .. 30 ms
        assert_eq!((min as u32 * 625 / 1000, max as u32 * 625 / 1000), (20, 30));
        let (min, max) = AdvertisingMode::Slow.interval();
        assert_eq!((min as u32 * 625 / 1000, max as u32 * 625 / 1000), (100, 500));
    }

    #[test]
    fn report_map_is_well_formed() {
        assert_eq!(REPORT_MAP[REPORT_MAP.len() - 1], 0xC0);
        assert_eq!(REPORT_MAP[7], REPORT_ID);
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn sim_generates_distinct_addresses() {
        let radio = SimRadio::new();
        let a = radio.generate_address();
        let b = radio.generate_address();
        assert_ne!(a, b);
        radio.set_address(a).unwrap();
        assert_eq!(radio.address(), a);
    }

    #[cfg(not(target_os = "espidf"))]
    #[test]
    fn sim_advertises_slowly_once_bonded() {
        let radio = SimRadio::new();
        radio.start_advertising().unwrap();
        assert_eq!(radio.advertising_mode(), Some(AdvertisingMode::Fast));
        radio.set_bonded(1);
        radio.start_advertising().unwrap();
        assert_eq!(radio.advertising_mode(), Some(AdvertisingMode::Slow));
        radio.clear_bonds().unwrap();
        assert_eq!(radio.bonded_count(), 0);
    }
}
