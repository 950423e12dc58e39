//! Protocol numbers shared by the codec, the peer engine and the router.

// Diameter base command codes
pub const CMD_CAPABILITIES_EXCHANGE: u32 = 257;
pub const CMD_DEVICE_WATCHDOG: u32 = 280;
pub const CMD_DISCONNECT_PEER: u32 = 282;

// Diameter base AVP codes
pub const AVP_HOST_IP_ADDRESS: u32 = 257;
pub const AVP_AUTH_APPLICATION_ID: u32 = 258;
pub const AVP_ACCT_APPLICATION_ID: u32 = 259;
pub const AVP_SESSION_ID: u32 = 263;
pub const AVP_ORIGIN_HOST: u32 = 264;
pub const AVP_VENDOR_ID: u32 = 266;
pub const AVP_FIRMWARE_REVISION: u32 = 267;
pub const AVP_RESULT_CODE: u32 = 268;
pub const AVP_PRODUCT_NAME: u32 = 269;
pub const AVP_DISCONNECT_CAUSE: u32 = 273;
pub const AVP_ORIGIN_STATE_ID: u32 = 278;
pub const AVP_ERROR_MESSAGE: u32 = 281;
pub const AVP_DESTINATION_REALM: u32 = 283;
pub const AVP_DESTINATION_HOST: u32 = 293;
pub const AVP_ORIGIN_REALM: u32 = 296;

// Result-Code values (AVP 268)
pub const RESULT_CODE_SUCCESS: u32 = 2001; // DIAMETER_SUCCESS
pub const RESULT_CODE_UNABLE_TO_DELIVER: u32 = 3002; // DIAMETER_UNABLE_TO_DELIVER
pub const RESULT_CODE_TOO_BUSY: u32 = 3004; // DIAMETER_TOO_BUSY
pub const RESULT_CODE_UNABLE_TO_COMPLY: u32 = 5012; // DIAMETER_UNABLE_TO_COMPLY

// Disconnect-Cause values (AVP 273)
pub const DISCONNECT_CAUSE_REBOOTING: u32 = 0;
pub const DISCONNECT_CAUSE_DO_NOT_WANT_TO_TALK: u32 = 2;

// RADIUS packet codes
pub const RADIUS_ACCESS_REQUEST: u8 = 1;
pub const RADIUS_ACCESS_ACCEPT: u8 = 2;
pub const RADIUS_ACCESS_REJECT: u8 = 3;
pub const RADIUS_ACCOUNTING_REQUEST: u8 = 4;
pub const RADIUS_ACCOUNTING_RESPONSE: u8 = 5;
pub const RADIUS_ACCESS_CHALLENGE: u8 = 11;
pub const RADIUS_DISCONNECT_REQUEST: u8 = 40;
pub const RADIUS_DISCONNECT_ACK: u8 = 41;
pub const RADIUS_DISCONNECT_NAK: u8 = 42;
pub const RADIUS_COA_REQUEST: u8 = 43;
pub const RADIUS_COA_ACK: u8 = 44;
pub const RADIUS_COA_NAK: u8 = 45;

// RADIUS attribute types
pub const RADIUS_ATTR_USER_NAME: u8 = 1;
pub const RADIUS_ATTR_USER_PASSWORD: u8 = 2;
pub const RADIUS_ATTR_CLASS: u8 = 25;
pub const RADIUS_ATTR_VENDOR_SPECIFIC: u8 = 26;
pub const RADIUS_ATTR_PROXY_STATE: u8 = 33;
pub const RADIUS_ATTR_TUNNEL_PASSWORD: u8 = 69;
pub const RADIUS_ATTR_MESSAGE_AUTHENTICATOR: u8 = 80;

// Default ports
pub const DIAMETER_PORT: u16 = 3868;
pub const RADIUS_AUTH_PORT: u16 = 1812;
pub const RADIUS_ACCT_PORT: u16 = 1813;
