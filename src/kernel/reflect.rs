//! SPIR-V reflection for compiled kernels.
//!
//! The runtime needs three facts out of a compiled kernel: its declared
//! workgroup dimensions, the size of its launch-parameter push-constant
//! block, and whether it declares resources outside the fixed binding
//! model. All three are recoverable from a linear scan of the SPIR-V
//! instruction stream; no control-flow analysis is involved.

use std::collections::HashMap;

const SPIRV_MAGIC: u32 = 0x0723_0203;

// Opcodes.
const OP_ENTRY_POINT: u16 = 15;
const OP_EXECUTION_MODE: u16 = 16;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_MATRIX: u16 = 24;
const OP_TYPE_ARRAY: u16 = 28;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_CONSTANT: u16 = 43;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;
const OP_MEMBER_DECORATE: u16 = 72;

// Execution models / modes.
const EXEC_MODEL_GL_COMPUTE: u32 = 5;
const EXEC_MODE_LOCAL_SIZE: u32 = 17;

// Storage classes.
const STORAGE_CLASS_UNIFORM_CONSTANT: u32 = 0;
const STORAGE_CLASS_UNIFORM: u32 = 2;
const STORAGE_CLASS_PUSH_CONSTANT: u32 = 9;
const STORAGE_CLASS_STORAGE_BUFFER: u32 = 12;

// Decorations.
const DECORATION_ARRAY_STRIDE: u32 = 6;
const DECORATION_MATRIX_STRIDE: u32 = 7;
const DECORATION_OFFSET: u32 = 35;

/// Facts reflected out of a kernel's SPIR-V.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reflection {
    /// Workgroup dimensions declared by the kernel.
    pub group_dims: [u32; 3],
    /// Size in bytes of the launch-parameter block, 0 when absent.
    pub launch_params_size: u32,
}

#[derive(Debug, Clone)]
enum TypeDef {
    Int { width: u32 },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Array { element: u32, length_id: u32 },
    Struct { members: Vec<u32> },
    Pointer { pointee: u32 },
}

#[derive(Default)]
struct ModuleScan {
    types: HashMap<u32, TypeDef>,
    constants: HashMap<u32, u32>,
    array_strides: HashMap<u32, u32>,
    /// (struct id, member index) -> byte offset
    member_offsets: HashMap<(u32, u32), u32>,
    /// (struct id, member index) -> matrix stride
    member_matrix_strides: HashMap<(u32, u32), u32>,
    compute_entry_points: Vec<(u32, String)>,
    local_sizes: HashMap<u32, [u32; 3]>,
    push_constant_blocks: Vec<u32>,
    storage_buffer_count: u32,
    uniform_constant_count: u32,
    uniform_buffer_count: u32,
}

/// Scans a SPIR-V module and extracts the kernel contract facts.
///
/// Rejects modules that violate the fixed binding model: more than one
/// push-constant block, any uniform buffer, or extra buffer/image
/// declarations beyond the runtime-provided heap and texture array.
pub fn reflect(words: &[u32]) -> Result<Reflection, String> {
    let scan = scan_module(words)?;

    let (entry_id, entry_name) = match scan.compute_entry_points.as_slice() {
        [] => return Err("no compute entry point".into()),
        [single] => single.clone(),
        multiple => {
            return Err(format!(
                "expected one compute entry point, found {}",
                multiple.len()
            ))
        }
    };
    if entry_name != "main" {
        return Err(format!("entry point must be `main`, found `{entry_name}`"));
    }

    let group_dims = *scan
        .local_sizes
        .get(&entry_id)
        .ok_or("kernel does not declare its workgroup size")?;
    if group_dims.contains(&0) {
        return Err(format!("workgroup size {group_dims:?} contains a zero"));
    }

    if scan.uniform_buffer_count > 0 {
        return Err(
            "kernels may not declare uniform buffers; use the launch-parameter block".into(),
        );
    }
    if scan.storage_buffer_count > 1 {
        return Err("kernels may not declare storage buffers beyond the global heap".into());
    }
    if scan.uniform_constant_count > 1 {
        return Err("kernels may not declare images beyond the RW-texture array".into());
    }

    let launch_params_size = match scan.push_constant_blocks.as_slice() {
        [] => 0,
        [single] => scan.push_constant_block_size(*single)?,
        multiple => {
            return Err(format!(
                "expected at most one launch-parameter block, found {}",
                multiple.len()
            ))
        }
    };

    Ok(Reflection {
        group_dims,
        launch_params_size,
    })
}

fn scan_module(words: &[u32]) -> Result<ModuleScan, String> {
    if words.len() < 5 {
        return Err("SPIR-V module too short".into());
    }
    if words[0] != SPIRV_MAGIC {
        return Err(format!("bad SPIR-V magic 0x{:08x}", words[0]));
    }

    let mut scan = ModuleScan::default();
    let mut cursor = 5;
    while cursor < words.len() {
        let word = words[cursor];
        let opcode = (word & 0xFFFF) as u16;
        let count = (word >> 16) as usize;
        if count == 0 || cursor + count > words.len() {
            return Err(format!("malformed instruction at word {cursor}"));
        }
        let operands = &words[cursor + 1..cursor + count];
        scan.visit(opcode, operands)?;
        cursor += count;
    }
    Ok(scan)
}

impl ModuleScan {
    fn visit(&mut self, opcode: u16, operands: &[u32]) -> Result<(), String> {
        match opcode {
            OP_ENTRY_POINT => {
                if operands.len() < 2 {
                    return Err("truncated OpEntryPoint".into());
                }
                if operands[0] == EXEC_MODEL_GL_COMPUTE {
                    let name = decode_string(&operands[2..]);
                    self.compute_entry_points.push((operands[1], name));
                }
            }
            OP_EXECUTION_MODE => {
                if operands.len() >= 5 && operands[1] == EXEC_MODE_LOCAL_SIZE {
                    self.local_sizes
                        .insert(operands[0], [operands[2], operands[3], operands[4]]);
                }
            }
            OP_TYPE_INT => {
                self.def_type(operands, 2, |ops| TypeDef::Int { width: ops[1] })?;
            }
            OP_TYPE_FLOAT => {
                self.def_type(operands, 2, |ops| TypeDef::Float { width: ops[1] })?;
            }
            OP_TYPE_VECTOR => {
                self.def_type(operands, 3, |ops| TypeDef::Vector {
                    component: ops[1],
                    count: ops[2],
                })?;
            }
            OP_TYPE_MATRIX => {
                self.def_type(operands, 3, |ops| TypeDef::Matrix {
                    column: ops[1],
                    count: ops[2],
                })?;
            }
            OP_TYPE_ARRAY => {
                self.def_type(operands, 3, |ops| TypeDef::Array {
                    element: ops[1],
                    length_id: ops[2],
                })?;
            }
            OP_TYPE_STRUCT => {
                if operands.is_empty() {
                    return Err("truncated OpTypeStruct".into());
                }
                self.types.insert(
                    operands[0],
                    TypeDef::Struct {
                        members: operands[1..].to_vec(),
                    },
                );
            }
            OP_TYPE_POINTER => {
                self.def_type(operands, 3, |ops| TypeDef::Pointer { pointee: ops[2] })?;
            }
            OP_CONSTANT => {
                // Only 32-bit literals matter here (array lengths).
                if operands.len() >= 3 {
                    self.constants.insert(operands[1], operands[2]);
                }
            }
            OP_VARIABLE => {
                if operands.len() < 3 {
                    return Err("truncated OpVariable".into());
                }
                let pointer_type = operands[0];
                match operands[2] {
                    STORAGE_CLASS_PUSH_CONSTANT => {
                        self.push_constant_blocks.push(pointer_type);
                    }
                    STORAGE_CLASS_STORAGE_BUFFER => self.storage_buffer_count += 1,
                    STORAGE_CLASS_UNIFORM_CONSTANT => self.uniform_constant_count += 1,
                    STORAGE_CLASS_UNIFORM => self.uniform_buffer_count += 1,
                    _ => {}
                }
            }
            OP_DECORATE => {
                if operands.len() >= 3 && operands[1] == DECORATION_ARRAY_STRIDE {
                    self.array_strides.insert(operands[0], operands[2]);
                }
            }
            OP_MEMBER_DECORATE => {
                if operands.len() >= 4 {
                    let key = (operands[0], operands[1]);
                    match operands[2] {
                        DECORATION_OFFSET => {
                            self.member_offsets.insert(key, operands[3]);
                        }
                        DECORATION_MATRIX_STRIDE => {
                            self.member_matrix_strides.insert(key, operands[3]);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn def_type(
        &mut self,
        operands: &[u32],
        min_operands: usize,
        build: impl FnOnce(&[u32]) -> TypeDef,
    ) -> Result<(), String> {
        if operands.len() < min_operands {
            return Err("truncated type instruction".into());
        }
        self.types.insert(operands[0], build(operands));
        Ok(())
    }

    /// Size of the struct behind a push-constant pointer type.
    fn push_constant_block_size(&self, pointer_type: u32) -> Result<u32, String> {
        let Some(TypeDef::Pointer { pointee, .. }) = self.types.get(&pointer_type) else {
            return Err("launch-parameter variable has no pointer type".into());
        };
        self.type_size(*pointee, None)
    }

    /// Computes the byte size of a type, honoring offset, array-stride and
    /// matrix-stride decorations. `member` carries the (struct, index)
    /// context so matrix strides resolve.
    fn type_size(&self, type_id: u32, member: Option<(u32, u32)>) -> Result<u32, String> {
        let def = self
            .types
            .get(&type_id)
            .ok_or_else(|| format!("unknown type id {type_id}"))?;
        match def {
            TypeDef::Int { width } | TypeDef::Float { width } => Ok(width / 8),
            TypeDef::Vector { component, count } => {
                Ok(self.type_size(*component, None)? * count)
            }
            TypeDef::Matrix { column, count } => {
                let stride = member
                    .and_then(|key| self.member_matrix_strides.get(&key).copied())
                    .map(Ok)
                    .unwrap_or_else(|| self.type_size(*column, None))?;
                Ok(stride * count)
            }
            TypeDef::Array { element, length_id } => {
                let length = *self
                    .constants
                    .get(length_id)
                    .ok_or("array length is not a literal constant")?;
                let stride = self
                    .array_strides
                    .get(&type_id)
                    .copied()
                    .map(Ok)
                    .unwrap_or_else(|| self.type_size(*element, None))?;
                Ok(stride * length)
            }
            TypeDef::Struct { members } => {
                let mut size = 0;
                for (index, &member_type) in members.iter().enumerate() {
                    let key = (type_id, index as u32);
                    let offset = self
                        .member_offsets
                        .get(&key)
                        .copied()
                        .ok_or("struct member is missing an offset decoration")?;
                    size = size.max(offset + self.type_size(member_type, Some(key))?);
                }
                Ok(size)
            }
            TypeDef::Pointer { .. } => {
                Err("unsupported type inside a launch-parameter block".into())
            }
        }
    }
}

fn decode_string(words: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    'outer: for word in words {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                break 'outer;
            }
            bytes.push(byte);
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds one SPIR-V instruction word stream.
    fn inst(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | opcode as u32];
        words.extend_from_slice(operands);
        words
    }

    fn string_operands(s: &str) -> Vec<u32> {
        let mut bytes: Vec<u8> = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn module(instructions: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![SPIRV_MAGIC, 0x0001_0500, 0, 100, 0];
        for i in instructions {
            words.extend_from_slice(i);
        }
        words
    }

    fn entry_point(id: u32, name: &str) -> Vec<u32> {
        let mut operands = vec![EXEC_MODEL_GL_COMPUTE, id];
        operands.extend(string_operands(name));
        inst(OP_ENTRY_POINT, &operands)
    }

    fn local_size(id: u32, x: u32, y: u32, z: u32) -> Vec<u32> {
        inst(OP_EXECUTION_MODE, &[id, EXEC_MODE_LOCAL_SIZE, x, y, z])
    }

    #[test]
    fn reflects_group_dims_without_params() {
        let words = module(&[entry_point(1, "main"), local_size(1, 16, 8, 1)]);
        let reflection = reflect(&words).unwrap();
        assert_eq!(reflection.group_dims, [16, 8, 1]);
        assert_eq!(reflection.launch_params_size, 0);
    }

    #[test]
    fn reflects_push_constant_block_size() {
        // struct { vec4 at 0; float at 16; } -> 20 bytes
        let words = module(&[
            entry_point(1, "main"),
            local_size(1, 64, 1, 1),
            inst(OP_MEMBER_DECORATE, &[5, 0, DECORATION_OFFSET, 0]),
            inst(OP_MEMBER_DECORATE, &[5, 1, DECORATION_OFFSET, 16]),
            inst(OP_TYPE_FLOAT, &[2, 32]),
            inst(OP_TYPE_VECTOR, &[3, 2, 4]),
            inst(OP_TYPE_STRUCT, &[5, 3, 2]),
            inst(OP_TYPE_POINTER, &[6, STORAGE_CLASS_PUSH_CONSTANT, 5]),
            inst(OP_VARIABLE, &[6, 7, STORAGE_CLASS_PUSH_CONSTANT]),
        ]);
        let reflection = reflect(&words).unwrap();
        assert_eq!(reflection.launch_params_size, 20);
    }

    #[test]
    fn array_and_matrix_strides_are_honored() {
        // struct { float[3] stride 16 at 0; mat2 stride 16 at 48 } -> 80
        let words = module(&[
            entry_point(1, "main"),
            local_size(1, 1, 1, 1),
            inst(OP_DECORATE, &[10, DECORATION_ARRAY_STRIDE, 16]),
            inst(OP_MEMBER_DECORATE, &[11, 0, DECORATION_OFFSET, 0]),
            inst(OP_MEMBER_DECORATE, &[11, 1, DECORATION_OFFSET, 48]),
            inst(OP_MEMBER_DECORATE, &[11, 1, DECORATION_MATRIX_STRIDE, 16]),
            inst(OP_TYPE_FLOAT, &[2, 32]),
            inst(OP_TYPE_INT, &[3, 32, 0]),
            inst(OP_CONSTANT, &[3, 4, 3]),
            inst(OP_TYPE_ARRAY, &[10, 2, 4]),
            inst(OP_TYPE_VECTOR, &[5, 2, 2]),
            inst(OP_TYPE_MATRIX, &[6, 5, 2]),
            inst(OP_TYPE_STRUCT, &[11, 10, 6]),
            inst(OP_TYPE_POINTER, &[12, STORAGE_CLASS_PUSH_CONSTANT, 11]),
            inst(OP_VARIABLE, &[12, 13, STORAGE_CLASS_PUSH_CONSTANT]),
        ]);
        let reflection = reflect(&words).unwrap();
        assert_eq!(reflection.launch_params_size, 80);
    }

    #[test]
    fn rejects_missing_local_size() {
        let words = module(&[entry_point(1, "main")]);
        assert!(reflect(&words).is_err());
    }

    #[test]
    fn rejects_zero_group_dimension() {
        let words = module(&[entry_point(1, "main"), local_size(1, 16, 0, 1)]);
        assert!(reflect(&words).is_err());
    }

    #[test]
    fn rejects_wrong_entry_point_name() {
        let words = module(&[entry_point(1, "kernel_main"), local_size(1, 1, 1, 1)]);
        assert!(reflect(&words).is_err());
    }

    #[test]
    fn rejects_uniform_buffers() {
        let words = module(&[
            entry_point(1, "main"),
            local_size(1, 1, 1, 1),
            inst(OP_TYPE_FLOAT, &[2, 32]),
            inst(OP_TYPE_STRUCT, &[3, 2]),
            inst(OP_TYPE_POINTER, &[4, STORAGE_CLASS_UNIFORM, 3]),
            inst(OP_VARIABLE, &[4, 5, STORAGE_CLASS_UNIFORM]),
        ]);
        let err = reflect(&words).unwrap_err();
        assert!(err.contains("uniform"), "{err}");
    }

    #[test]
    fn rejects_two_push_constant_blocks() {
        let words = module(&[
            entry_point(1, "main"),
            local_size(1, 1, 1, 1),
            inst(OP_MEMBER_DECORATE, &[3, 0, DECORATION_OFFSET, 0]),
            inst(OP_TYPE_FLOAT, &[2, 32]),
            inst(OP_TYPE_STRUCT, &[3, 2]),
            inst(OP_TYPE_POINTER, &[4, STORAGE_CLASS_PUSH_CONSTANT, 3]),
            inst(OP_VARIABLE, &[4, 5, STORAGE_CLASS_PUSH_CONSTANT]),
            inst(OP_VARIABLE, &[4, 6, STORAGE_CLASS_PUSH_CONSTANT]),
        ]);
        assert!(reflect(&words).is_err());
    }

    #[test]
    fn single_heap_and_texture_array_declarations_pass() {
        let words = module(&[
            entry_point(1, "main"),
            local_size(1, 8, 8, 1),
            inst(OP_TYPE_FLOAT, &[2, 32]),
            inst(OP_TYPE_STRUCT, &[3, 2]),
            inst(OP_TYPE_POINTER, &[4, STORAGE_CLASS_STORAGE_BUFFER, 3]),
            inst(OP_VARIABLE, &[4, 5, STORAGE_CLASS_STORAGE_BUFFER]),
            inst(OP_TYPE_POINTER, &[6, STORAGE_CLASS_UNIFORM_CONSTANT, 2]),
            inst(OP_VARIABLE, &[6, 7, STORAGE_CLASS_UNIFORM_CONSTANT]),
        ]);
        assert!(reflect(&words).is_ok());
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(reflect(&[0xDEAD_BEEF, 0, 0, 0, 0]).is_err());
    }
}
