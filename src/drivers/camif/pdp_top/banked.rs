//! v5.0 / v5.20 / v6.0 / v6.1 排布
//!
//! 链路 VC 按连续区间分给 OTF 输出, 所有通道的 mux 选择器挤在一个寄存器里.

use super::{
    LinkVcList, PdpTopOps, CAMIF_OTF_OUT_SINGLE, LINK_VC_NONE, TOP_R_OTF_MUX,
};
use crate::config::{CSIS_OTF_CH_LC_NUM, CSI_VIRTUAL_CH_MAX, MAX_NUM_CSIS_OTF_CH};
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

const MUX_SEL_BITS: u32 = 6;

fn mux_field(otf_ch: usize) -> RegField {
    RegField::rw("OTF_MUX_SEL", TOP_R_OTF_MUX, otf_ch as u32 * MUX_SEL_BITS, MUX_SEL_BITS)
        .with_reset(super::OTF_MUX_NONE)
}

pub struct BankedTop;

impl PdpTopOps for BankedTop {
    fn link_vc_list(&self, max_vc_num: u32, otf_out_id: usize) -> LinkVcList {
        let mut list = [LINK_VC_NONE; CSIS_OTF_CH_LC_NUM];

        let start = if otf_out_id != CAMIF_OTF_OUT_SINGLE && max_vc_num as usize > CSIS_OTF_CH_LC_NUM {
            CSIS_OTF_CH_LC_NUM
        } else {
            0
        };
        let end = (start + CSIS_OTF_CH_LC_NUM).min(CSI_VIRTUAL_CH_MAX);

        for (slot, vc) in list.iter_mut().zip(start..end) {
            *slot = vc as u8;
        }
        list
    }

    fn s_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize, sel: u32, _otf_out_id: usize) {
        if otf_ch < MAX_NUM_CSIS_OTF_CH {
            regfield::write(regs, &mux_field(otf_ch), sel);
        }
    }

    fn g_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize) -> u32 {
        regfield::get(regs, &mux_field(otf_ch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::pdp_top::{CAMIF_OTF_OUT_MID, CAMIF_OTF_OUT_SHORT, OTF_MUX_NONE};
    use crate::hal::mmio::SimBank;

    const N: u8 = LINK_VC_NONE;

    #[test]
    fn test_link_vc_ranges() {
        let top = BankedTop;
        for max in 0..=10 {
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_SINGLE), [0, 1, 2, 3, 4, 5]);
        }
        for max in 0..=6 {
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_SHORT), [0, 1, 2, 3, 4, 5]);
        }
        for max in 7..=10 {
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_SHORT), [6, 7, 8, 9, N, N]);
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_MID), [6, 7, 8, 9, N, N]);
            // 同样输入得到同样结果
            assert_eq!(
                top.link_vc_list(max, CAMIF_OTF_OUT_SHORT),
                top.link_vc_list(max, CAMIF_OTF_OUT_SHORT)
            );
        }
    }

    #[test]
    fn test_mux_selectors_share_one_register() {
        let top = BankedTop;
        let bank = SimBank::new(0x100);
        top.s_otf_mux_sel(&bank, 0, OTF_MUX_NONE, 0);
        top.s_otf_mux_sel(&bank, 1, 3, 0);
        top.s_otf_mux_sel(&bank, 2, 5, 0);
        assert_eq!(top.g_otf_mux_sel(&bank, 0), OTF_MUX_NONE);
        assert_eq!(top.g_otf_mux_sel(&bank, 1), 3);
        assert_eq!(top.g_otf_mux_sel(&bank, 2), 5);
        assert_eq!(bank.read32(TOP_R_OTF_MUX), 0x3f | 3 << 6 | 5 << 12);
    }
}
