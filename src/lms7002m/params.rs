//! LMS7002M register bit fields.

/// A bit field `[msb:lsb]` of one 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub name: &'static str,
    pub address: u16,
    pub msb: u8,
    pub lsb: u8,
    pub default: u16,
}

impl Parameter {
    /// Unnamed field for raw register access.
    pub const fn new(address: u16, msb: u8, lsb: u8) -> Parameter {
        Parameter {
            name: "",
            address,
            msb,
            lsb,
            default: 0,
        }
    }

    pub fn by_name(name: &str) -> Option<&'static Parameter> {
        ALL_PARAMS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn is_valid(&self) -> bool {
        self.msb < 16 && self.lsb <= self.msb
    }

    pub fn mask(&self) -> u16 {
        let width = (self.msb.saturating_sub(self.lsb) + 1) as u32;
        let bits = if width >= 16 {
            0xFFFF
        } else {
            ((1u32 << width) - 1) as u16
        };
        bits << self.lsb
    }

    /// Extract this field from a register value.
    pub fn get(&self, reg: u16) -> u16 {
        (reg & self.mask()) >> self.lsb
    }

    /// Replace this field in `reg` with `val`, masking off excess bits.
    pub fn set(&self, reg: u16, val: u16) -> u16 {
        let mask = self.mask();
        (reg & !mask) | ((val << self.lsb) & mask)
    }
}

macro_rules! params {
    ( $( $name:ident : $addr:expr, $msb:expr, $lsb:expr, $default:expr; )+ ) => {
        $(
            pub const $name: Parameter = Parameter {
                name: stringify!($name),
                address: $addr,
                msb: $msb,
                lsb: $lsb,
                default: $default,
            };
        )+

        pub const ALL_PARAMS: &[Parameter] = &[ $( $name, )+ ];
    };
}

params! {
    // LimeLight / channel select
    MAC: 0x0020, 1, 0, 3;

    // CGEN
    EN_ADCCLKH_CLKGN: 0x0086, 11, 11, 0;
    PD_VCO_CGEN: 0x0086, 2, 2, 0;
    EN_G_CGEN: 0x0086, 0, 0, 1;
    FRAC_SDM_CGEN_LSB: 0x0087, 15, 0, 0x0400;
    INT_SDM_CGEN: 0x0088, 13, 4, 120;
    FRAC_SDM_CGEN_MSB: 0x0088, 3, 0, 0;
    CLKH_OV_CLKL_CGEN: 0x0089, 12, 11, 2;
    DIV_OUTCH_CGEN: 0x0089, 10, 3, 4;
    CSW_VCO_CGEN: 0x008B, 8, 1, 128;
    VCO_CMPHO_CGEN: 0x008C, 13, 13, 0;
    VCO_CMPLO_CGEN: 0x008C, 12, 12, 0;

    // TRF
    EN_G_TRF: 0x0100, 0, 0, 1;
    LOSS_LIN_TXPAD_TRF: 0x0101, 10, 6, 0;
    LOSS_MAIN_TXPAD_TRF: 0x0101, 5, 1, 0;
    EN_LOOPB_TXPAD_TRF: 0x0101, 0, 0, 0;
    SEL_BAND1_TRF: 0x0103, 11, 11, 1;
    SEL_BAND2_TRF: 0x0103, 10, 10, 0;

    // TBB
    PD_LPFH_TBB: 0x0105, 4, 4, 0;
    PD_LPFLAD_TBB: 0x0105, 3, 3, 0;
    PD_LPFS5_TBB: 0x0105, 2, 2, 1;
    EN_G_TBB: 0x0105, 0, 0, 1;
    BYPLADDER_TBB: 0x010A, 15, 15, 0;

    // RFE
    EN_G_RFE: 0x010C, 0, 0, 1;
    SEL_PATH_RFE: 0x010D, 8, 7, 1;
    EN_INSHSW_LB1_RFE: 0x010D, 4, 4, 1;
    EN_INSHSW_LB2_RFE: 0x010D, 3, 3, 1;
    G_LNA_RFE: 0x0113, 9, 6, 15;
    G_TIA_RFE: 0x0113, 1, 0, 3;

    // RBB
    PD_LPFH_RBB: 0x0115, 3, 3, 1;
    PD_LPFL_RBB: 0x0115, 2, 2, 0;
    EN_G_RBB: 0x0115, 0, 0, 1;
    INPUT_CTL_PGA_RBB: 0x0118, 15, 13, 0;
    G_PGA_RBB: 0x0119, 4, 0, 11;

    // SX, channel A is SXR and channel B is SXT
    EN_DIV2_DIVPROG: 0x011C, 10, 10, 1;
    PD_VCO: 0x011C, 1, 1, 0;
    EN_G: 0x011C, 0, 0, 1;
    FRAC_SDM_LSB: 0x011D, 15, 0, 0x0400;
    INT_SDM: 0x011E, 13, 4, 120;
    FRAC_SDM_MSB: 0x011E, 3, 0, 0;
    DIV_LOCH: 0x011F, 8, 6, 0;
    CSW_VCO: 0x0121, 10, 3, 128;
    SEL_VCO: 0x0121, 2, 1, 2;
    VCO_CMPHO: 0x0123, 13, 13, 0;
    VCO_CMPLO: 0x0123, 12, 12, 0;

    // TxTSP
    TSGFC_TXTSP: 0x0200, 9, 9, 0;
    TSGFCW_TXTSP: 0x0200, 8, 7, 1;
    TSGDCLDQ_TXTSP: 0x0200, 6, 6, 0;
    TSGDCLDI_TXTSP: 0x0200, 5, 5, 0;
    TSGMODE_TXTSP: 0x0200, 3, 3, 0;
    INSEL_TXTSP: 0x0200, 2, 2, 0;
    EN_TXTSP: 0x0200, 0, 0, 1;
    HBI_OVR_TXTSP: 0x0203, 14, 12, 0;
    GFIR1_L_TXTSP: 0x0205, 10, 8, 0;
    GFIR1_N_TXTSP: 0x0205, 7, 0, 0;
    GFIR2_L_TXTSP: 0x0206, 10, 8, 0;
    GFIR2_N_TXTSP: 0x0206, 7, 0, 0;
    GFIR3_L_TXTSP: 0x0207, 10, 8, 0;
    GFIR3_N_TXTSP: 0x0207, 7, 0, 0;
    CMIX_SC_TXTSP: 0x0208, 13, 13, 0;
    CMIX_BYP_TXTSP: 0x0208, 8, 8, 0;
    GFIR3_BYP_TXTSP: 0x0208, 6, 6, 1;
    GFIR2_BYP_TXTSP: 0x0208, 5, 5, 1;
    GFIR1_BYP_TXTSP: 0x0208, 4, 4, 1;
    DC_REG_TXTSP: 0x020C, 15, 0, 0;
    SEL_TX: 0x0240, 4, 1, 0;
    MODE_TX: 0x0240, 0, 0, 0;

    // RxTSP
    TSGFC_RXTSP: 0x0400, 9, 9, 0;
    TSGFCW_RXTSP: 0x0400, 8, 7, 1;
    TSGDCLDQ_RXTSP: 0x0400, 6, 6, 0;
    TSGDCLDI_RXTSP: 0x0400, 5, 5, 0;
    TSGMODE_RXTSP: 0x0400, 3, 3, 0;
    INSEL_RXTSP: 0x0400, 2, 2, 0;
    EN_RXTSP: 0x0400, 0, 0, 1;
    HBD_OVR_RXTSP: 0x0403, 14, 12, 0;
    GFIR1_L_RXTSP: 0x0405, 10, 8, 0;
    GFIR1_N_RXTSP: 0x0405, 7, 0, 0;
    GFIR2_L_RXTSP: 0x0406, 10, 8, 0;
    GFIR2_N_RXTSP: 0x0406, 7, 0, 0;
    GFIR3_L_RXTSP: 0x0407, 10, 8, 0;
    GFIR3_N_RXTSP: 0x0407, 7, 0, 0;
    DC_REG_RXTSP: 0x040B, 15, 0, 0;
    CMIX_SC_RXTSP: 0x040C, 13, 13, 0;
    CMIX_BYP_RXTSP: 0x040C, 7, 7, 0;
    GFIR3_BYP_RXTSP: 0x040C, 5, 5, 1;
    GFIR2_BYP_RXTSP: 0x040C, 4, 4, 1;
    GFIR1_BYP_RXTSP: 0x040C, 3, 3, 1;
    SEL_RX: 0x0440, 4, 1, 0;
    MODE_RX: 0x0440, 0, 0, 0;
}

/// TSP fields that exist once per direction.
pub struct TspParams {
    pub en: Parameter,
    pub insel: Parameter,
    pub tsgmode: Parameter,
    pub tsgfcw: Parameter,
    pub tsgfc: Parameter,
    pub tsgdcldi: Parameter,
    pub tsgdcldq: Parameter,
    pub dc_reg: Parameter,
    pub hb_ovr: Parameter,
    pub cmix_byp: Parameter,
    pub cmix_sc: Parameter,
    pub nco_sel: Parameter,
    pub nco_mode: Parameter,
    pub gfir_l: [Parameter; 3],
    pub gfir_n: [Parameter; 3],
    pub gfir_byp: [Parameter; 3],
    /// First register of the NCO block.
    pub nco_base: u16,
    /// First register of each GFIR coefficient memory; GFIR3 has three banks.
    pub gfir_base: [u16; 3],
}

pub const TX_TSP: TspParams = TspParams {
    en: EN_TXTSP,
    insel: INSEL_TXTSP,
    tsgmode: TSGMODE_TXTSP,
    tsgfcw: TSGFCW_TXTSP,
    tsgfc: TSGFC_TXTSP,
    tsgdcldi: TSGDCLDI_TXTSP,
    tsgdcldq: TSGDCLDQ_TXTSP,
    dc_reg: DC_REG_TXTSP,
    hb_ovr: HBI_OVR_TXTSP,
    cmix_byp: CMIX_BYP_TXTSP,
    cmix_sc: CMIX_SC_TXTSP,
    nco_sel: SEL_TX,
    nco_mode: MODE_TX,
    gfir_l: [GFIR1_L_TXTSP, GFIR2_L_TXTSP, GFIR3_L_TXTSP],
    gfir_n: [GFIR1_N_TXTSP, GFIR2_N_TXTSP, GFIR3_N_TXTSP],
    gfir_byp: [GFIR1_BYP_TXTSP, GFIR2_BYP_TXTSP, GFIR3_BYP_TXTSP],
    nco_base: 0x0240,
    gfir_base: [0x0280, 0x02C0, 0x0300],
};

pub const RX_TSP: TspParams = TspParams {
    en: EN_RXTSP,
    insel: INSEL_RXTSP,
    tsgmode: TSGMODE_RXTSP,
    tsgfcw: TSGFCW_RXTSP,
    tsgfc: TSGFC_RXTSP,
    tsgdcldi: TSGDCLDI_RXTSP,
    tsgdcldq: TSGDCLDQ_RXTSP,
    dc_reg: DC_REG_RXTSP,
    hb_ovr: HBD_OVR_RXTSP,
    cmix_byp: CMIX_BYP_RXTSP,
    cmix_sc: CMIX_SC_RXTSP,
    nco_sel: SEL_RX,
    nco_mode: MODE_RX,
    gfir_l: [GFIR1_L_RXTSP, GFIR2_L_RXTSP, GFIR3_L_RXTSP],
    gfir_n: [GFIR1_N_RXTSP, GFIR2_N_RXTSP, GFIR3_N_RXTSP],
    gfir_byp: [GFIR1_BYP_RXTSP, GFIR2_BYP_RXTSP, GFIR3_BYP_RXTSP],
    nco_base: 0x0440,
    gfir_base: [0x0480, 0x04C0, 0x0500],
};

pub fn tsp(tx: bool) -> &'static TspParams {
    if tx {
        &TX_TSP
    } else {
        &RX_TSP
    }
}

/// Register ranges making up the chip state. Addresses below 0x0100 are
/// shared, the rest exist once per channel.
pub const REGISTER_SECTIONS: &[(u16, u16)] = &[
    (0x0020, 0x002F),
    (0x0081, 0x008C),
    (0x0092, 0x00AE),
    (0x0100, 0x011A),
    (0x011C, 0x0124),
    (0x0200, 0x020C),
    (0x0240, 0x0261),
    (0x0280, 0x02A7),
    (0x02C0, 0x02E7),
    (0x0300, 0x0327),
    (0x0340, 0x0367),
    (0x0380, 0x03A7),
    (0x0400, 0x040F),
    (0x0440, 0x0461),
    (0x0480, 0x04A7),
    (0x04C0, 0x04E7),
    (0x0500, 0x0527),
    (0x0540, 0x0567),
    (0x0580, 0x05A7),
];

pub fn register_addresses() -> impl Iterator<Item = u16> {
    REGISTER_SECTIONS.iter().flat_map(|&(lo, hi)| lo..=hi)
}

/// Power-on value of `addr` assembled from the field defaults.
pub fn default_value(addr: u16) -> u16 {
    ALL_PARAMS
        .iter()
        .filter(|p| p.address == addr)
        .fold(0, |reg, p| p.set(reg, p.default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_get_set() {
        assert_eq!(MAC.mask(), 0x0003);
        assert_eq!(MAC.set(0xFFFF, 1), 0xFFFD);
        assert_eq!(G_LNA_RFE.get(15 << 6), 15);
        // values wider than the field are masked
        assert_eq!(G_TIA_RFE.set(0, 0xFF), 0x0003);
        assert_eq!(DC_REG_TXTSP.mask(), 0xFFFF);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Parameter::by_name("mac"), Some(&MAC));
        assert!(Parameter::by_name("NOT_A_FIELD").is_none());
    }

    #[test]
    fn test_defaults_combine_fields() {
        assert_eq!(default_value(0x0020), 0x0003);
        // INT_SDM_CGEN=120, FRAC MSB=0
        assert_eq!(default_value(0x0088), 120 << 4);
        assert_eq!(default_value(0x7FFF), 0);
    }

    #[test]
    fn test_raw_parameter_validity() {
        assert!(Parameter::new(0x0020, 15, 0).is_valid());
        assert!(!Parameter::new(0x0020, 3, 5).is_valid());
        assert!(!Parameter::new(0x0020, 16, 0).is_valid());
    }
}
