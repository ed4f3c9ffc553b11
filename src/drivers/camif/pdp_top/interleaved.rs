//! v8.0 / v13.0 排布
//!
//! VC 多于一个 IBUF 的 LC 数时, 偶数 VC 给 single 输出, 奇数 VC 给 short/mid.
//! 每个 OTF 通道一个 mux 寄存器, 带 VC 奇偶选择位.

use super::{LinkVcList, PdpTopOps, CAMIF_OTF_OUT_SINGLE, LINK_VC_NONE, TOP_R_OTF_MUX};
use crate::config::{CSIS_OTF_CH_LC_NUM, CSI_VIRTUAL_CH_MAX, MAX_NUM_CSIS_OTF_CH};
use crate::hal::mmio::RegisterBank;
use crate::hal::regfield::{self, RegField};

const MUX_F_SEL: RegField = RegField::rw("OTF_MUX_SEL", TOP_R_OTF_MUX, 0, 6)
    .with_reset(super::OTF_MUX_NONE)
    .with_stride(4);
const MUX_F_VC_ODD: RegField = RegField::rw("OTF_MUX_VC_ODD", TOP_R_OTF_MUX, 8, 1).with_stride(4);

fn is_split(max_vc_num: u32) -> bool {
    max_vc_num as usize > CSIS_OTF_CH_LC_NUM
}

pub struct InterleavedTop;

impl PdpTopOps for InterleavedTop {
    fn link_vc_list(&self, max_vc_num: u32, otf_out_id: usize) -> LinkVcList {
        let mut list = [LINK_VC_NONE; CSIS_OTF_CH_LC_NUM];

        if !is_split(max_vc_num) {
            for (slot, vc) in list.iter_mut().zip(0..CSIS_OTF_CH_LC_NUM) {
                *slot = vc as u8;
            }
            return list;
        }

        let first = if otf_out_id == CAMIF_OTF_OUT_SINGLE { 0 } else { 1 };
        for (slot, vc) in list.iter_mut().zip((first..CSI_VIRTUAL_CH_MAX).step_by(2)) {
            *slot = vc as u8;
        }
        list
    }

    fn s_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize, sel: u32, otf_out_id: usize) {
        if otf_ch >= MAX_NUM_CSIS_OTF_CH {
            return;
        }
        regfield::write(regs, &MUX_F_SEL.at(otf_ch), sel);
        let odd = sel != super::OTF_MUX_NONE && otf_out_id != CAMIF_OTF_OUT_SINGLE;
        regfield::write(regs, &MUX_F_VC_ODD.at(otf_ch), odd as u32);
    }

    fn g_otf_mux_sel(&self, regs: &dyn RegisterBank, otf_ch: usize) -> u32 {
        regfield::get(regs, &MUX_F_SEL.at(otf_ch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::camif::pdp_top::{CAMIF_OTF_OUT_MID, CAMIF_OTF_OUT_SHORT};
    use crate::hal::mmio::SimBank;

    const N: u8 = LINK_VC_NONE;

    #[test]
    fn test_link_vc_parity() {
        let top = InterleavedTop;
        for max in 0..=6 {
            for id in [CAMIF_OTF_OUT_SINGLE, CAMIF_OTF_OUT_SHORT, CAMIF_OTF_OUT_MID] {
                assert_eq!(top.link_vc_list(max, id), [0, 1, 2, 3, 4, 5]);
            }
        }
        for max in 7..=10 {
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_SINGLE), [0, 2, 4, 6, 8, N]);
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_SHORT), [1, 3, 5, 7, 9, N]);
            assert_eq!(top.link_vc_list(max, CAMIF_OTF_OUT_MID), [1, 3, 5, 7, 9, N]);
        }
    }

    #[test]
    fn test_mux_odd_select() {
        let top = InterleavedTop;
        let bank = SimBank::new(0x100);
        top.s_otf_mux_sel(&bank, 1, 2, CAMIF_OTF_OUT_SHORT);
        assert_eq!(top.g_otf_mux_sel(&bank, 1), 2);
        assert_eq!(regfield::get(&bank, &MUX_F_VC_ODD.at(1)), 1);
        top.s_otf_mux_sel(&bank, 1, super::super::OTF_MUX_NONE, CAMIF_OTF_OUT_SHORT);
        assert_eq!(regfield::get(&bank, &MUX_F_VC_ODD.at(1)), 0);
        assert_eq!(bank.read32(TOP_R_OTF_MUX + 4), super::super::OTF_MUX_NONE);
    }
}
