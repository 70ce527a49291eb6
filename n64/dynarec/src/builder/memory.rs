use vr4300::instructions::Form;
use vr4300::AccessKind;

use super::Builder;
use crate::ir::{BinaryOp, Helper, HelperArgs, RegClass, ValueId, ValueKind, ValueType};

impl Builder<'_> {
    /// `rs + simm`, the virtual address of every load and store
    fn effective_address(&mut self) -> ValueId {
        let i = self.inst.inst.i();
        let base = self.gpr(i.rs());
        let offset = self.constant(ValueType::S16, i.simm());
        self.binary(BinaryOp::Add, base, offset)
    }

    /// Virtual to physical, leaving the block on a miss or misalignment
    fn translate_address(&mut self, access: AccessKind, size: u8) -> ValueId {
        let vaddr = self.effective_address();
        self.push_raising(ValueKind::TlbLookup { vaddr, access, size })
    }

    pub(super) fn load_store(&mut self, form: Form, size: u8, signed: bool) {
        let rt = self.inst.inst.i().rt();
        if form == Form::StoreBaseImm {
            let address = self.translate_address(AccessKind::Store, size);
            let value = self.gpr(rt);
            self.push(ValueKind::Store { size, address, value });
        } else {
            let address = self.translate_address(AccessKind::Load, size);
            let ty = ValueType::load(size, signed);
            let value = self.push(ValueKind::Load { ty, class: RegClass::Gpr, address });
            self.set_gpr(rt, value);
        }
    }

    /// LWL/LWR/LDL/LDR/SWL/SWR/SDL/SDR merge with the old register or memory contents,
    /// which is left to the runtime
    pub(super) fn load_store_unaligned(&mut self, form: Form, size: u8, left: bool) {
        let rt = self.inst.inst.i().rt();
        let vaddr = self.effective_address();
        let reg = self.gpr(rt);
        let store = form == Form::StoreBaseImm;
        let helper = match (store, left) {
            (false, true) => Helper::LoadLeft { size },
            (false, false) => Helper::LoadRight { size },
            (true, true) => Helper::StoreLeft { size },
            (true, false) => Helper::StoreRight { size },
        };
        let result = self.push_raising(ValueKind::Call { helper, args: HelperArgs::two(vaddr, reg) });
        if !store {
            self.set_gpr(rt, result);
        }
    }

    pub(super) fn load_store_linked(&mut self, form: Form, size: u8) {
        let rt = self.inst.inst.i().rt();
        let vaddr = self.effective_address();
        let call = if form == Form::StoreBaseImm {
            let value = self.gpr(rt);
            ValueKind::Call { helper: Helper::StoreConditional { size }, args: HelperArgs::two(vaddr, value) }
        } else {
            ValueKind::Call { helper: Helper::LoadLinked { size }, args: HelperArgs::one(vaddr) }
        };
        let result = self.push_raising(call);
        self.set_gpr(rt, result);
    }

    pub(super) fn load_store_fpu(&mut self, form: Form, size: u8) {
        let ft = self.inst.inst.i().rt();
        if form == Form::StoreFpuBaseImm {
            let address = self.translate_address(AccessKind::Store, size);
            let value = if size == 8 { self.read_fpr64(ft) } else { self.read_fpr32(ft) };
            self.push(ValueKind::Store { size, address, value });
        } else {
            let address = self.translate_address(AccessKind::Load, size);
            let ty = ValueType::load(size, false);
            let value = self.push(ValueKind::Load { ty, class: RegClass::Fgr, address });
            if size == 8 {
                self.write_fpr64(ft, value);
            } else {
                self.write_fpr32(ft, value, true);
            }
        }
    }
}
