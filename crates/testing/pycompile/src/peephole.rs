// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The peephole pass CPython runs over every code object before assembly: constant folding,
//! jump threading, and dead code after returns. Instructions are rewritten to `NOP` in place and
//! compacted at the end, so jump targets stay valid while the pass runs.

use unpyc_bytecode::{Constant, Opcode, Version};

use crate::ast::{BinaryOp, UnaryOp};
use crate::fold;
use crate::labels::Instr;

pub fn optimize(ops: &mut Vec<Instr>, consts: &mut Vec<Constant>, version: Version) {
    let blocks = mark_blocks(ops);
    let mut pass = Peephole {
        ops,
        consts,
        version,
        blocks,
    };
    let mut i = 0;
    while i < pass.ops.len() {
        // Rewriting a conditional jump can expose another rewrite at the same spot.
        let mut rounds = 0;
        while pass.visit(i) && rounds < pass.ops.len() {
            rounds += 1;
        }
        i += 1;
    }
    compact(pass.ops);
}

/// Basic block number of each instruction: a new block starts at every jump target.
fn mark_blocks(ops: &[Instr]) -> Vec<usize> {
    let mut starts = vec![false; ops.len()];
    for target in ops.iter().filter_map(|i| i.target) {
        if let Some(s) = starts.get_mut(target) {
            *s = true;
        }
    }
    starts
        .iter()
        .scan(0, |block, &start| {
            *block += start as usize;
            Some(*block)
        })
        .collect()
}

/// Drop `NOP`s, moving jumps that landed on one to the next live instruction.
fn compact(ops: &mut Vec<Instr>) {
    let mut remap = Vec::with_capacity(ops.len() + 1);
    let mut live = 0;
    for op in ops.iter() {
        remap.push(live);
        if op.op != Opcode::Nop {
            live += 1;
        }
    }
    remap.push(live);
    ops.retain(|op| op.op != Opcode::Nop);
    for op in ops.iter_mut() {
        if let Some(t) = op.target {
            op.target = Some(remap[t.min(remap.len() - 1)]);
        }
    }
}

struct Peephole<'a> {
    ops: &'a mut Vec<Instr>,
    consts: &'a mut Vec<Constant>,
    version: Version,
    blocks: Vec<usize>,
}

impl Peephole<'_> {
    /// No jump lands strictly inside `start..=end`.
    fn basic_block(&self, start: usize, end: usize) -> bool {
        match (self.blocks.get(start), self.blocks.get(end)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn op_at(&self, i: usize) -> Option<Opcode> {
        self.ops.get(i).map(|o| o.op)
    }

    fn nop(&mut self, i: usize) {
        let line = self.ops[i].line;
        self.ops[i] = Instr::new(Opcode::Nop, 0, line);
    }

    fn load_const(&mut self, i: usize, value: Constant) {
        let index = self.consts.len() as u32;
        self.consts.push(value);
        let line = self.ops[i].line;
        self.ops[i] = Instr::new(Opcode::LoadConst, index, line);
    }

    fn constant(&self, i: usize) -> Option<&Constant> {
        self.consts.get(self.ops[i].arg as usize)
    }

    /// Indices of the `n` constant loads that end just before `end`. From 3.6 on the run may be
    /// interrupted by `NOP`s left behind by earlier folds.
    fn const_run(&self, end: usize, n: usize) -> Option<Vec<usize>> {
        let mut found = Vec::with_capacity(n);
        let mut j = end;
        while found.len() < n && j > 0 {
            j -= 1;
            match self.ops[j].op {
                Opcode::LoadConst => found.push(j),
                Opcode::Nop if self.version >= Version::V3_6 => {}
                _ => return None,
            }
        }
        if found.len() < n {
            return None;
        }
        found.reverse();
        Some(found)
    }

    /// Rewrite around instruction `i`; true when it should be visited again.
    fn visit(&mut self, i: usize) -> bool {
        let instr = self.ops[i];
        let next = self.op_at(i + 1);
        match instr.op {
            Opcode::LoadConst => {
                if next == Some(Opcode::PopJumpIfFalse)
                    && self.basic_block(i, i + 1)
                    && self.constant(i).is_some_and(fold::truthy)
                {
                    self.nop(i);
                    self.nop(i + 1);
                }
                false
            }
            Opcode::UnaryNot => {
                if next == Some(Opcode::PopJumpIfFalse) && self.basic_block(i, i + 1) {
                    self.nop(i);
                    self.ops[i + 1].op = Opcode::PopJumpIfTrue;
                }
                false
            }
            Opcode::CompareOp => {
                if (6..=9).contains(&instr.arg)
                    && next == Some(Opcode::UnaryNot)
                    && self.basic_block(i, i + 1)
                {
                    self.ops[i].arg ^= 1;
                    self.nop(i + 1);
                }
                false
            }
            Opcode::UnaryNegative | Opcode::UnaryInvert | Opcode::UnaryPositive
                if self.version < Version::V3_7 =>
            {
                self.fold_unary(i);
                false
            }
            Opcode::BuildTuple | Opcode::BuildList => {
                self.fold_build(i);
                false
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                if let Some(t) = instr.target
                    && let Some(target) = self.ops.get(t).copied()
                    && target.op.is_conditional_jump()
                {
                    if target.jumps_on_true() == instr.jumps_on_true() {
                        self.ops[i].op = target.op;
                        self.ops[i].target = target.target;
                    } else {
                        self.ops[i].op = if instr.jumps_on_true() {
                            Opcode::PopJumpIfTrue
                        } else {
                            Opcode::PopJumpIfFalse
                        };
                        self.ops[i].target = Some(t + 1);
                    }
                    return true;
                }
                self.thread_jump(i);
                false
            }
            Opcode::PopJumpIfFalse
            | Opcode::PopJumpIfTrue
            | Opcode::ForIter
            | Opcode::JumpForward
            | Opcode::JumpAbsolute
            | Opcode::SetupLoop => {
                self.thread_jump(i);
                false
            }
            Opcode::ReturnValue => {
                self.after_return(i);
                false
            }
            op => {
                if self.version < Version::V3_7
                    && let Some(binop) = binary_op(op)
                {
                    self.fold_binary(i, binop);
                }
                false
            }
        }
    }

    fn fold_unary(&mut self, i: usize) {
        let op = match self.ops[i].op {
            Opcode::UnaryNegative => UnaryOp::Neg,
            Opcode::UnaryInvert => UnaryOp::Invert,
            _ => UnaryOp::Pos,
        };
        let Some(run) = self.const_run(i, 1) else {
            return;
        };
        if !self.basic_block(run[0], i) {
            return;
        }
        let Some(folded) = self
            .constant(run[0])
            .and_then(|c| fold::unary(op, c, self.version))
        else {
            return;
        };
        self.nop(run[0]);
        self.load_const(i, folded);
    }

    fn fold_binary(&mut self, i: usize, op: BinaryOp) {
        let Some(run) = self.const_run(i, 2) else {
            return;
        };
        if !self.basic_block(run[0], i) {
            return;
        }
        let (Some(left), Some(right)) = (self.constant(run[0]), self.constant(run[1])) else {
            return;
        };
        let Some(folded) = fold::binary(op, left, right, self.version) else {
            return;
        };
        self.nop(run[0]);
        self.nop(run[1]);
        self.load_const(i, folded);
    }

    /// `BUILD_TUPLE` over constants, lists that are only tested for membership or iterated,
    /// and build-then-unpack swaps.
    fn fold_build(&mut self, i: usize) {
        let instr = self.ops[i];
        let n = instr.arg as usize;
        let next = self.ops.get(i + 1).copied();
        let foldable = match instr.op {
            Opcode::BuildTuple => true,
            _ => next.is_some_and(|next| {
                (next.op == Opcode::CompareOp
                    && (6..=7).contains(&next.arg)
                    && self.version < Version::V3_7)
                    || (next.op == Opcode::GetIter && self.version == Version::V3_6)
            }),
        };
        let min = if self.version >= Version::V3_6 { 1 } else { 0 };
        if foldable
            && n >= min
            && let Some(run) = self.const_run(i, n)
        {
            let start = run.first().copied().unwrap_or(i);
            let end = if instr.op == Opcode::BuildTuple { i } else { i + 1 };
            let items = run
                .iter()
                .map(|&j| self.constant(j).cloned())
                .collect::<Option<Vec<_>>>();
            if self.basic_block(start, end)
                && let Some(items) = items
            {
                for j in run {
                    self.nop(j);
                }
                self.load_const(i, Constant::Tuple(items));
                return;
            }
        }
        let Some(next) = next else {
            return;
        };
        if next.op != Opcode::UnpackSequence || next.arg as usize != n || !self.basic_block(i, i + 1)
        {
            return;
        }
        match n {
            0 if self.version >= Version::V3_6 => {
                self.nop(i);
                self.nop(i + 1);
            }
            1 => {
                self.nop(i);
                self.nop(i + 1);
            }
            2 => {
                self.ops[i] = Instr::new(Opcode::RotTwo, 0, instr.line);
                self.nop(i + 1);
            }
            3 => {
                self.ops[i] = Instr::new(Opcode::RotThree, 0, instr.line);
                self.ops[i + 1] = Instr::new(Opcode::RotTwo, 0, next.line);
            }
            _ => {}
        }
    }

    /// A jump to a return becomes the return; a jump to an unconditional jump goes straight to
    /// that jump's target.
    fn thread_jump(&mut self, i: usize) {
        let instr = self.ops[i];
        let Some(target) = instr.target.and_then(|t| self.ops.get(t).copied()) else {
            return;
        };
        if instr.op.is_unconditional_jump() && target.op == Opcode::ReturnValue {
            self.ops[i] = Instr::new(Opcode::ReturnValue, 0, instr.line);
            return;
        }
        if !target.op.is_unconditional_jump() {
            return;
        }
        let Some(final_target) = target.target else {
            return;
        };
        let op = match instr.op {
            Opcode::JumpForward => Opcode::JumpAbsolute,
            op => op,
        };
        let relative = Instr { op, ..instr }.is_relative_jump();
        if relative && final_target <= i {
            return;
        }
        self.ops[i].op = op;
        self.ops[i].target = Some(final_target);
    }

    fn after_return(&mut self, i: usize) {
        if self.version >= Version::V3_6 {
            let mut h = i + 1;
            while h < self.ops.len() && self.basic_block(i, h) {
                self.nop(h);
                h += 1;
            }
            return;
        }
        if self.op_at(i + 2) == Some(Opcode::ReturnValue)
            && self.op_at(i + 1) == Some(Opcode::LoadConst)
            && self.basic_block(i, i + 2)
        {
            self.nop(i + 1);
            self.nop(i + 2);
        } else if self.op_at(i + 1).is_some_and(|op| op.is_unconditional_jump())
            && self.basic_block(i, i + 1)
        {
            self.nop(i + 1);
        }
    }
}

fn binary_op(op: Opcode) -> Option<BinaryOp> {
    Some(match op {
        Opcode::BinaryPower => BinaryOp::Pow,
        Opcode::BinaryMultiply => BinaryOp::Mul,
        Opcode::BinaryTrueDivide => BinaryOp::TrueDiv,
        Opcode::BinaryFloorDivide => BinaryOp::FloorDiv,
        Opcode::BinaryModulo => BinaryOp::Mod,
        Opcode::BinaryAdd => BinaryOp::Add,
        Opcode::BinarySubtract => BinaryOp::Sub,
        Opcode::BinaryLshift => BinaryOp::LShift,
        Opcode::BinaryRshift => BinaryOp::RShift,
        Opcode::BinaryAnd => BinaryOp::BitAnd,
        Opcode::BinaryXor => BinaryOp::BitXor,
        Opcode::BinaryOr => BinaryOp::BitOr,
        _ => return None,
    })
}
