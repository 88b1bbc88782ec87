use std::collections::{HashMap, HashSet};

use crate::bytecode::op_code::{Instructions, OpCode, make, read_operands};
use crate::runtime::compiled_function::SourceMapEntry;

fn is_jump(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::OpJump | OpCode::OpJumpFalsy | OpCode::OpAndJump | OpCode::OpOrJump
    )
}

fn ends_flow(op: OpCode) -> bool {
    matches!(op, OpCode::OpReturn | OpCode::OpThrow | OpCode::OpSuspend)
}

/// Dead-code elimination over one function body.
///
/// Instructions after a return (or throw/suspend) up to the next jump
/// destination are unreachable and dropped; surviving jumps are rebuilt
/// against the new layout, and the source map follows. Returns the new
/// instruction stream, the remapped per-instruction source map, and the
/// count of local slots defined only in dead code (to subtract from the
/// function's `num_locals`).
pub(super) fn eliminate_dead_code(
    instructions: Instructions,
    source_map: Vec<SourceMapEntry>,
) -> (Instructions, Vec<SourceMapEntry>, usize) {
    if instructions.is_empty() {
        return (instructions, source_map, 0);
    }

    // Pass 1: every jump destination revives the code that follows it.
    let mut targets = HashSet::new();
    let mut ip = 0;
    while ip < instructions.len() {
        let op = OpCode::from(instructions[ip]);
        let (operands, read) = read_operands(op, &instructions, ip + 1);
        if is_jump(op) {
            targets.insert(operands[0]);
        }
        ip += 1 + read;
    }

    // Pass 2: select live instructions and track local definitions.
    let mut keep: Vec<(usize, usize)> = Vec::new();
    let mut live = true;
    let mut live_defines = HashSet::new();
    let mut dead_defines = HashSet::new();
    ip = 0;
    while ip < instructions.len() {
        if targets.contains(&ip) {
            live = true;
        }
        let op = OpCode::from(instructions[ip]);
        let (operands, read) = read_operands(op, &instructions, ip + 1);
        if live {
            keep.push((ip, 1 + read));
            if op == OpCode::OpDefineLocal {
                live_defines.insert(operands[0]);
            }
            if ends_flow(op) {
                live = false;
            }
        } else if op == OpCode::OpDefineLocal {
            dead_defines.insert(operands[0]);
        }
        ip += 1 + read;
    }

    let jumps_to_end = targets.contains(&instructions.len());
    if !jumps_to_end && keep.iter().map(|(_, len)| len).sum::<usize>() == instructions.len() {
        // Nothing was dead and no jump needs a landing pad at the end;
        // keep the original stream untouched.
        return (instructions, source_map, 0);
    }

    // Offset mapping. The old end maps to the new end so jumps that target
    // the function end stay valid.
    let mut offset_map = HashMap::new();
    let mut new_len = 0usize;
    for (offset, len) in &keep {
        offset_map.insert(*offset, new_len);
        new_len += len;
    }
    offset_map.insert(instructions.len(), new_len);

    let positions: HashMap<u32, _> = source_map
        .iter()
        .map(|entry| (entry.offset, entry.pos))
        .collect();

    // Pass 3: rebuild with remapped jumps and source map.
    let mut new_instructions = Instructions::with_capacity(new_len);
    let mut new_source_map = Vec::with_capacity(keep.len());
    let mut end_is_jump_target = false;
    for (offset, len) in &keep {
        let op = OpCode::from(instructions[*offset]);
        let new_offset = new_instructions.len();
        if is_jump(op) {
            let (operands, _) = read_operands(op, &instructions, offset + 1);
            let target = *offset_map
                .get(&operands[0])
                .expect("jump target is always live");
            if target == new_len {
                end_is_jump_target = true;
            }
            new_instructions.extend(make(op, &[target]));
        } else {
            new_instructions.extend_from_slice(&instructions[*offset..offset + len]);
        }
        if let Some(pos) = positions.get(&(*offset as u32)) {
            new_source_map.push(SourceMapEntry {
                offset: new_offset as u32,
                pos: *pos,
            });
        }
    }

    // A jump to the removed tail needs something to land on.
    if end_is_jump_target {
        new_instructions.extend(make(OpCode::OpReturn, &[0]));
    }

    let dead_locals = dead_defines.difference(&live_defines).count();
    (new_instructions, new_source_map, dead_locals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::position::Position;

    fn map_for(instructions: &Instructions) -> Vec<SourceMapEntry> {
        let mut entries = Vec::new();
        let mut ip = 0;
        let mut line = 1;
        while ip < instructions.len() {
            let op = OpCode::from(instructions[ip]);
            let (_, read) = read_operands(op, instructions, ip + 1);
            entries.push(SourceMapEntry {
                offset: ip as u32,
                pos: Position::new(line, 1),
            });
            line += 1;
            ip += 1 + read;
        }
        entries
    }

    #[test]
    fn test_code_after_return_is_dropped() {
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpReturn, &[1]));
        instructions.extend(make(OpCode::OpConstant, &[1])); // dead
        instructions.extend(make(OpCode::OpPop, &[])); // dead
        let map = map_for(&instructions);

        let (optimized, new_map, dead) = eliminate_dead_code(instructions, map);
        assert_eq!(
            optimized,
            [make(OpCode::OpConstant, &[0]), make(OpCode::OpReturn, &[1])].concat()
        );
        assert_eq!(new_map.len(), 2);
        assert_eq!(dead, 0);
    }

    #[test]
    fn test_jump_destination_revives_code() {
        // The constant after the return is dead, but the jump destination
        // at offset 5 revives the code that follows it. The pass is
        // conservative: every scanned destination stays live.
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpReturn, &[0])); // 0..2
        instructions.extend(make(OpCode::OpConstant, &[0])); // 2..5 dead
        instructions.extend(make(OpCode::OpJump, &[5])); // 5..8 self-targeting
        let map = map_for(&instructions);
        let (optimized, _, _) = eliminate_dead_code(instructions, map);
        let mut expected = Instructions::new();
        expected.extend(make(OpCode::OpReturn, &[0]));
        expected.extend(make(OpCode::OpJump, &[2]));
        assert_eq!(optimized, expected);
    }

    #[test]
    fn test_jumps_are_remapped() {
        // if-style layout with a dead tail in the then-branch:
        //   0: JumpFalsy -> 10
        //   3: Constant 0
        //   6: Return 1
        //   8: Pop            (dead)
        //   9: Pop            (dead)
        //  10: Null            (alive: jump target)
        //  11: Return 1
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpJumpFalsy, &[10]));
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpReturn, &[1]));
        instructions.extend(make(OpCode::OpPop, &[]));
        instructions.extend(make(OpCode::OpPop, &[]));
        instructions.extend(make(OpCode::OpNull, &[]));
        instructions.extend(make(OpCode::OpReturn, &[1]));
        let map = map_for(&instructions);

        let (optimized, _, _) = eliminate_dead_code(instructions, map);
        let mut expected = Instructions::new();
        expected.extend(make(OpCode::OpJumpFalsy, &[8]));
        expected.extend(make(OpCode::OpConstant, &[0]));
        expected.extend(make(OpCode::OpReturn, &[1]));
        expected.extend(make(OpCode::OpNull, &[]));
        expected.extend(make(OpCode::OpReturn, &[1]));
        assert_eq!(optimized, expected);
    }

    #[test]
    fn test_dead_local_definitions_are_counted() {
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpReturn, &[0]));
        instructions.extend(make(OpCode::OpNull, &[])); // dead
        instructions.extend(make(OpCode::OpDefineLocal, &[3])); // dead
        let map = map_for(&instructions);

        let (_, _, dead) = eliminate_dead_code(instructions, map);
        assert_eq!(dead, 1);
    }

    #[test]
    fn test_jump_to_end_gets_a_return_landing_pad() {
        // fn() { if c { return 1 } } — the falsy jump targets the function
        // end, which needs an instruction to land on.
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpGetLocal, &[0])); // 0..2
        instructions.extend(make(OpCode::OpJumpFalsy, &[10])); // 2..5
        instructions.extend(make(OpCode::OpConstant, &[0])); // 5..8
        instructions.extend(make(OpCode::OpReturn, &[1])); // 8..10
        let map = map_for(&instructions);

        let (optimized, _, _) = eliminate_dead_code(instructions.clone(), map);
        let mut expected = instructions;
        expected.extend(make(OpCode::OpReturn, &[0]));
        assert_eq!(optimized, expected);
    }

    #[test]
    fn test_live_code_is_untouched() {
        let mut instructions = Instructions::new();
        instructions.extend(make(OpCode::OpConstant, &[0]));
        instructions.extend(make(OpCode::OpDefineLocal, &[0]));
        instructions.extend(make(OpCode::OpGetLocal, &[0]));
        instructions.extend(make(OpCode::OpReturn, &[1]));
        let map = map_for(&instructions);

        let (optimized, new_map, dead) = eliminate_dead_code(instructions.clone(), map.clone());
        assert_eq!(optimized, instructions);
        assert_eq!(new_map.len(), map.len());
        assert_eq!(dead, 0);
    }
}
