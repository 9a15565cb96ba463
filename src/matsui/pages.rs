//! URLs of the Matsui Securities pages the strategies drive.

const WWW_BASE: &str = "https://www.matsui.co.jp";
const FUND_BASE: &str = "https://fund.matsui.co.jp";
const TRADE_BASE: &str = "https://trade.matsui.co.jp";
const US_STOCK_BASE: &str = "https://ustrade.matsui.co.jp";

/// Fund site top page, used as the authenticated session probe.
pub fn fund_home() -> String {
    format!("{FUND_BASE}/ra/robo-advisor/page/main.html#!/home")
}

pub fn fund_login() -> String {
    format!("{FUND_BASE}/ra/robo-advisor/m_login/login.html")
}

/// Fund holdings inquiry page.
pub fn fund_position() -> String {
    format!("{FUND_BASE}/ra/robo-advisor/page/main.html#!/position")
}

/// The fund site redirects here during maintenance windows.
pub fn fund_maintenance() -> String {
    format!("{WWW_BASE}/utility/fund/mente/index.html#!/home")
}

pub fn member_home() -> String {
    format!("{TRADE_BASE}/mgap/member/index")
}

pub fn member_login() -> String {
    format!("{TRADE_BASE}/mgap/login")
}

/// URL fragment identifying the member site maintenance redirect.
pub fn trade_maintenance_fragment() -> &'static str {
    "/mgap/mente"
}

pub fn us_stock_position() -> String {
    format!("{US_STOCK_BASE}/ust/possess-list")
}
