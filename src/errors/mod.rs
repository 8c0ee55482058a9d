//! # Módulo de Códigos de Erro Estruturados
//!
//! Define códigos de erro padronizados para melhor UX e integração
//! com sistemas externos (CI/CD, dashboards, alertas).
//!
//! ## Para todos entenderem:
//!
//! Quando uma recuperação dá errado, este módulo fornece códigos
//! únicos que identificam exatamente o que aconteceu. É como ter um
//! "número do erro" que você pode pesquisar na documentação ou passar
//! para o time de laboratório.
//!
//! ## Categorias de Erro
//!
//! | Faixa  | Categoria        | Descrição                            |
//! |--------|------------------|--------------------------------------|
//! | E1xxx  | Configuração     | Erro no documento de planos          |
//! | E2xxx  | Acesso a device  | Erro falando com DUT/servo/RPM       |
//! | E3xxx  | Execução de plano| Exec falhou, timeout, limite atingido|
//! | E4xxx  | Ambiente         | Problema de setup/arquivos           |
//! | E5xxx  | Interno          | Bug no próprio runner                |
//!
//! ## Exemplo:
//!
//! ```text
//! Error E3002: exec excedeu o timeout
//!   Action: dut_ssh
//!   Timeout: 30s
//! ```
//!
//! Com o código E3002, você sabe que:
//! - É um erro de execução de plano (3xxx)
//! - Especificamente timeout de exec (002)

use std::fmt;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O código é um número de 4 dígitos onde:
/// - Primeiro dígito: categoria (1-5)
/// - Últimos 3 dígitos: erro específico (001-999)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Configuração/Validação
    // ========================================================================
    // Erros detectados antes de qualquer action rodar.
    // O problema está no documento de planos.

    /// Plano pedido não existe no documento.
    pub const UNKNOWN_PLAN: Self = Self(1001);

    /// Documento JSON malformado ou com tipos errados.
    pub const INVALID_DOCUMENT: Self = Self(1002);

    /// Action lista a si mesma como condição, dependência ou recuperação.
    pub const SELF_REFERENCE: Self = Self(1003);

    /// `exec_timeout` zero ou negativo.
    pub const NON_POSITIVE_TIMEOUT: Self = Self(1004);

    /// Nome de action vazio ou só espaços.
    pub const EMPTY_ACTION_NAME: Self = Self(1005);

    // ========================================================================
    // E2xxx: Acesso a Device
    // ========================================================================
    // Erros falando com o DUT ou seus periféricos.

    /// Probe de alcançabilidade falhou.
    pub const PING_FAILED: Self = Self(2001);

    /// Comando remoto retornou exit code não-zero ou não rodou.
    pub const COMMAND_FAILED: Self = Self(2002);

    /// O serviço servod reportou uma falha na chamada.
    pub const SERVOD_FAULT: Self = Self(2003);

    /// Transferência de arquivo falhou.
    pub const COPY_FAILED: Self = Self(2004);

    /// Controle da tomada de energia falhou.
    pub const POWER_FAILED: Self = Self(2005);

    /// Leitura ou escrita de inventário falhou.
    pub const INVENTORY_FAILED: Self = Self(2006);

    // ========================================================================
    // E3xxx: Execução de Plano
    // ========================================================================
    // Erros durante a travessia do plano.

    /// O exec de uma action retornou falha.
    pub const EXEC_FAILED: Self = Self(3001);

    /// O exec não terminou dentro do `exec_timeout`.
    pub const EXEC_TIMEOUT: Self = Self(3002);

    /// Nenhum exec registrado com esse nome.
    pub const REGISTRY_MISS: Self = Self(3003);

    /// Falha veio do cache de resultados (a action já tinha falhado).
    pub const CACHED_FAILURE: Self = Self(3004);

    /// Limite de reinícios (start-over) atingido.
    pub const RESTART_LIMIT: Self = Self(3005);

    /// Limite de profundidade de travessia atingido.
    pub const DEPTH_LIMIT: Self = Self(3006);

    /// Escopo da execução foi cancelado.
    pub const CANCELLED: Self = Self(3007);

    // ========================================================================
    // E4xxx: Ambiente
    // ========================================================================

    /// Arquivo de configuração não encontrado.
    pub const CONFIG_FILE_NOT_FOUND: Self = Self(4001);

    /// Arquivo de configuração ilegível.
    pub const CONFIG_FILE_UNREADABLE: Self = Self(4002);

    // ========================================================================
    // E5xxx: Erros Internos
    // ========================================================================
    // Bugs no próprio runner. Se você ver esses, reporte!

    /// Erro interno inesperado.
    pub const INTERNAL_ERROR: Self = Self(5001);

    /// A task do exec morreu (panic) em vez de retornar.
    pub const EXEC_PANIC: Self = Self(5002);

    // ========================================================================
    // MÉTODOS
    // ========================================================================

    /// Retorna o código numérico.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Retorna o código formatado com prefixo "E".
    ///
    /// Exemplo: ErrorCode::EXEC_TIMEOUT.formatted() == "E3002"
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    /// Retorna a categoria do erro baseado no primeiro dígito.
    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Configuration,
            2 => ErrorCategory::DeviceAccess,
            3 => ErrorCategory::PlanExecution,
            4 => ErrorCategory::Environment,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Retorna uma descrição curta do erro.
    pub fn description(&self) -> &'static str {
        match self.0 {
            1001 => "Plano desconhecido",
            1002 => "Documento de planos inválido",
            1003 => "Action referencia a si mesma",
            1004 => "exec_timeout não positivo",
            1005 => "Nome de action vazio",
            2001 => "Ping falhou",
            2002 => "Comando remoto falhou",
            2003 => "servod reportou falha",
            2004 => "Cópia de arquivo falhou",
            2005 => "Controle de energia falhou",
            2006 => "Acesso a inventário falhou",
            3001 => "Exec falhou",
            3002 => "Exec excedeu o timeout",
            3003 => "Exec não registrado",
            3004 => "Falha vinda do cache",
            3005 => "Limite de reinícios atingido",
            3006 => "Limite de profundidade atingido",
            3007 => "Execução cancelada",
            4001 => "Arquivo de configuração não encontrado",
            4002 => "Arquivo de configuração ilegível",
            5001 => "Erro interno",
            5002 => "Task do exec morreu",
            _ => "Erro desconhecido",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================================================
// CATEGORIA DE ERRO
// ============================================================================

/// Categoria de erro baseada no primeiro dígito do código.
///
/// Útil para agrupar erros em relatórios ou dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Erros do documento de planos (E1xxx).
    Configuration,

    /// Erros falando com o device (E2xxx).
    DeviceAccess,

    /// Erros durante a travessia do plano (E3xxx).
    PlanExecution,

    /// Erros de setup/ambiente (E4xxx).
    Environment,

    /// Erros internos (E5xxx).
    Internal,

    /// Código fora das faixas conhecidas.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuração"),
            Self::DeviceAccess => write!(f, "Acesso a device"),
            Self::PlanExecution => write!(f, "Execução de plano"),
            Self::Environment => write!(f, "Ambiente"),
            Self::Internal => write!(f, "Interno"),
            Self::Unknown => write!(f, "Desconhecido"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_formatting() {
        assert_eq!(ErrorCode::UNKNOWN_PLAN.formatted(), "E1001");
        assert_eq!(ErrorCode::PING_FAILED.formatted(), "E2001");
        assert_eq!(ErrorCode::EXEC_TIMEOUT.formatted(), "E3002");
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::SELF_REFERENCE.category(), ErrorCategory::Configuration);
        assert_eq!(ErrorCode::SERVOD_FAULT.category(), ErrorCategory::DeviceAccess);
        assert_eq!(ErrorCode::REGISTRY_MISS.category(), ErrorCategory::PlanExecution);
        assert_eq!(
            ErrorCode::CONFIG_FILE_NOT_FOUND.category(),
            ErrorCategory::Environment
        );
        assert_eq!(ErrorCode::INTERNAL_ERROR.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_error_code_descriptions_are_unique() {
        let codes = [
            ErrorCode::UNKNOWN_PLAN,
            ErrorCode::INVALID_DOCUMENT,
            ErrorCode::SELF_REFERENCE,
            ErrorCode::NON_POSITIVE_TIMEOUT,
            ErrorCode::EMPTY_ACTION_NAME,
            ErrorCode::PING_FAILED,
            ErrorCode::COMMAND_FAILED,
            ErrorCode::SERVOD_FAULT,
            ErrorCode::COPY_FAILED,
            ErrorCode::POWER_FAILED,
            ErrorCode::INVENTORY_FAILED,
            ErrorCode::EXEC_FAILED,
            ErrorCode::EXEC_TIMEOUT,
            ErrorCode::REGISTRY_MISS,
            ErrorCode::CACHED_FAILURE,
            ErrorCode::RESTART_LIMIT,
            ErrorCode::DEPTH_LIMIT,
            ErrorCode::CANCELLED,
        ];
        for code in &codes {
            assert_ne!(code.description(), "Erro desconhecido", "{}", code);
        }
    }
}
